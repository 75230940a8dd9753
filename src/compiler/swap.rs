use crate::compiler::CompiledAutogradError;
use crate::compiler::key::CompiledArg;
use crate::tensor::{SymInt, Tensor};
use serde::{Deserialize, Serialize};

/// Placeholder accounting of one capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub placeholders_produced: usize,
    pub placeholders_consumed: usize,
    pub size_placeholders_produced: usize,
    pub size_placeholders_consumed: usize,
    pub stashed: usize,
    pub restored: usize,
}

/// Placeholders handed out by the session plus the gradient values bound
/// for the grad targets, in schedule order.
pub(crate) struct TraceState {
    proxy_inputs: Vec<Tensor>,
    index: usize,
    size_proxies: Vec<SymInt>,
    size_index: usize,
    outputs: Vec<Tensor>,
    stashed: usize,
    restored: usize,
}

impl TraceState {
    pub(crate) fn new(proxy_inputs: Vec<Tensor>, size_proxies: Vec<SymInt>) -> Self {
        Self {
            proxy_inputs,
            index: 0,
            size_proxies,
            size_index: 0,
            outputs: Vec::new(),
            stashed: 0,
            restored: 0,
        }
    }

    fn next_size_proxy(&mut self) -> Result<SymInt, CompiledAutogradError> {
        let proxy = *self
            .size_proxies
            .get(self.size_index)
            .ok_or(CompiledAutogradError::SizePlaceholdersExhausted(
                self.size_proxies.len(),
            ))?;
        self.size_index += 1;
        Ok(proxy)
    }

    fn next_proxy(&mut self) -> Result<Tensor, CompiledAutogradError> {
        let proxy = self
            .proxy_inputs
            .get(self.index)
            .cloned()
            .ok_or(CompiledAutogradError::PlaceholdersExhausted(
                self.proxy_inputs.len(),
            ))?;
        self.index += 1;
        Ok(proxy)
    }

    pub(crate) fn finish(
        self,
        strict: bool,
    ) -> Result<(Vec<Tensor>, CaptureStats), CompiledAutogradError> {
        let stats = CaptureStats {
            placeholders_produced: self.proxy_inputs.len(),
            placeholders_consumed: self.index,
            size_placeholders_produced: self.size_proxies.len(),
            size_placeholders_consumed: self.size_index,
            stashed: self.stashed,
            restored: self.restored,
        };
        check_accounting(
            "placeholder consumption",
            stats.placeholders_produced,
            stats.placeholders_consumed,
            strict,
        )?;
        check_accounting(
            "size placeholder consumption",
            stats.size_placeholders_produced,
            stats.size_placeholders_consumed,
            strict,
        )?;
        Ok((self.outputs, stats))
    }
}

fn check_accounting(
    what: &'static str,
    expected: usize,
    got: usize,
    strict: bool,
) -> Result<(), CompiledAutogradError> {
    if expected == got {
        return Ok(());
    }
    if strict {
        return Err(CompiledAutogradError::PlaceholderAccounting {
            what,
            expected,
            got,
        });
    }
    log::warn!("Placeholder accounting mismatch in {what}: expected {expected}, got {got}");
    Ok(())
}

/// Swaps a node's saved values for placeholders while the node is replayed,
/// then puts the originals back.
///
/// Originals come back first in, first out, so nodes call `after` on their
/// fields in the same order they called `before`. A `before` that fails
/// leaves its value untouched and stashes nothing; calling `after` on every
/// field afterwards restores exactly the ones that were swapped.
pub struct SwapSavedVariables<'a> {
    state: &'a mut TraceState,
    stashed: Vec<Tensor>,
    restored: usize,
    stashed_sizes: Vec<SymInt>,
    restored_sizes: usize,
    failed: bool,
}

impl<'a> SwapSavedVariables<'a> {
    pub(crate) fn new(state: &'a mut TraceState) -> Self {
        Self {
            state,
            stashed: Vec::new(),
            restored: 0,
            stashed_sizes: Vec::new(),
            restored_sizes: 0,
            failed: false,
        }
    }

    pub fn before<T: CompiledArg + ?Sized>(
        &mut self,
        value: &mut T,
    ) -> Result<(), CompiledAutogradError> {
        value.before(self)
    }

    pub fn after<T: CompiledArg + ?Sized>(&mut self, value: &mut T) {
        value.after(self)
    }

    /// Undefined tensors are stashed but consume no placeholder, matching
    /// how they were collected.
    pub fn before_tensor(&mut self, tensor: &mut Tensor) -> Result<(), CompiledAutogradError> {
        if tensor.is_defined() {
            let proxy = self.state.next_proxy().inspect_err(|_| self.failed = true)?;
            self.stashed.push(std::mem::replace(tensor, proxy));
        } else {
            self.stashed.push(Tensor::undefined());
        }
        Ok(())
    }

    pub fn after_tensor(&mut self, tensor: &mut Tensor) {
        match self.stashed.get_mut(self.restored) {
            Some(original) => {
                *tensor = std::mem::take(original);
                self.restored += 1;
            }
            None if self.failed => {}
            None => log::warn!(
                "Restoring saved tensor {} of {} stashed",
                self.restored,
                self.stashed.len()
            ),
        }
    }

    /// Sizes are swapped for symbolic sizes backed by the capture's size inputs.
    pub fn before_size(&mut self, size: &mut SymInt) -> Result<(), CompiledAutogradError> {
        let proxy = self.state.next_size_proxy().inspect_err(|_| self.failed = true)?;
        self.stashed_sizes.push(std::mem::replace(size, proxy));
        Ok(())
    }

    pub fn after_size(&mut self, size: &mut SymInt) {
        match self.stashed_sizes.get(self.restored_sizes) {
            Some(original) => {
                *size = *original;
                self.restored_sizes += 1;
            }
            None if self.failed => {}
            None => log::warn!(
                "Restoring saved size {} of {} stashed",
                self.restored_sizes,
                self.stashed_sizes.len()
            ),
        }
    }

    /// Binds the gradient value of the next grad target.
    pub fn set_grad_value(&mut self, grad: Tensor) {
        self.state.outputs.push(grad);
    }

    pub(crate) fn finish(self, strict: bool) -> Result<(), CompiledAutogradError> {
        self.state.stashed += self.stashed.len() + self.stashed_sizes.len();
        self.state.restored += self.restored + self.restored_sizes;
        check_accounting("saved tensor restore", self.stashed.len(), self.restored, strict)?;
        check_accounting(
            "saved size restore",
            self.stashed_sizes.len(),
            self.restored_sizes,
            strict,
        )
    }
}
