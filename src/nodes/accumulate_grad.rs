use crate::compiler::CompiledAutogradError;
use crate::compiler::key::CompiledNodeArgs;
use crate::compiler::swap::SwapSavedVariables;
use crate::graph::{Edge, GraphNode, NodeHooks, NodeKind};
use crate::tensor::{GradSlot, Tensor, TensorError, TypeAndSize};

/// Sink of a leaf variable. The incoming gradient replaces whatever the
/// variable's slot held.
pub struct AccumulateGrad {
    variable: GradSlot,
    meta: TypeAndSize,
    hooks: NodeHooks,
}

impl AccumulateGrad {
    pub fn new(variable: GradSlot, meta: TypeAndSize) -> Self {
        Self {
            variable,
            meta,
            hooks: NodeHooks::default(),
        }
    }

    pub fn variable(&self) -> &GradSlot {
        &self.variable
    }

    fn check(&self, grad: &Tensor) -> Result<(), TensorError> {
        match grad.shape() {
            Some(shape) if shape != self.meta.shape() => Err(TensorError::ShapeMismatch(
                "AccumulateGrad",
                self.meta.shape(),
                shape.to_vec(),
            )),
            _ => Ok(()),
        }
    }
}

impl GraphNode for AccumulateGrad {
    fn kind(&self) -> NodeKind {
        NodeKind::of::<Self>()
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn next_edges(&self) -> &[Edge] {
        &[]
    }

    fn hooks(&self) -> &NodeHooks {
        &self.hooks
    }

    fn hooks_mut(&mut self) -> &mut NodeHooks {
        &mut self.hooks
    }

    fn compiled_args(&self, args: &mut CompiledNodeArgs<'_>) {
        args.collect(&self.meta);
        args.set_grad_target(&self.variable);
    }

    fn apply(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, TensorError> {
        let grad = inputs.into_iter().next().unwrap_or_default();
        self.check(&grad)?;
        self.variable.set_grad(grad);
        Ok(vec![])
    }

    fn apply_with_saved(
        &mut self,
        inputs: Vec<Tensor>,
        saved: &mut SwapSavedVariables<'_>,
    ) -> Result<Vec<Tensor>, CompiledAutogradError> {
        let grad = inputs.into_iter().next().unwrap_or_default();
        let checked = saved
            .before(&mut self.meta)
            .and_then(|()| Ok(self.check(&grad)?));
        if checked.is_ok() {
            saved.set_grad_value(grad);
        }
        saved.after(&mut self.meta);
        checked.map(|()| vec![])
    }
}
