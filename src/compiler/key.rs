use crate::compiler::swap::SwapSavedVariables;
use crate::compiler::{AutogradCompilerCall, CompiledAutogradError, NodeCall};
use crate::dtype::DType;
use crate::graph::{NodeHooks, NodeKind};
use crate::tensor::{GradSlot, Scalar, ScalarType, SymInt, Tensor, TypeAndSize};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};

pub const DEFAULT_KEY_CAPACITY: usize = 512;

fn compare_keys(a: (NodeKind, &[u8]), b: (NodeKind, &[u8])) -> Ordering {
    a.0.cmp(&b.0)
        .then(a.1.len().cmp(&b.1.len()))
        .then_with(|| a.1.cmp(b.1))
}

/// A key borrowed from a builder's scratch buffer. Only valid while the node it
/// was built for is being processed.
#[derive(Clone, Copy)]
pub struct CacheKeyRef<'a> {
    pub kind: NodeKind,
    pub bytes: &'a [u8],
}

impl CacheKeyRef<'_> {
    pub fn to_owned_key(&self) -> CacheKey {
        CacheKey {
            kind: self.kind,
            bytes: self.bytes.into(),
        }
    }
}

/// A key that owns its bytes, as stored in the cache.
#[derive(Clone)]
pub struct CacheKey {
    kind: NodeKind,
    bytes: Box<[u8]>,
}

impl CacheKey {
    pub fn new(kind: NodeKind, bytes: &[u8]) -> Self {
        Self {
            kind,
            bytes: bytes.into(),
        }
    }

    pub fn as_key_ref(&self) -> CacheKeyRef<'_> {
        CacheKeyRef {
            kind: self.kind,
            bytes: &self.bytes,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

macro_rules! key_ordering {
    ($($ty:ty),*) => {
        $(
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.kind == other.kind && self.bytes[..] == other.bytes[..]
            }
        }

        impl Eq for $ty {}

        impl PartialOrd for $ty {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $ty {
            fn cmp(&self, other: &Self) -> Ordering {
                compare_keys((self.kind, &self.bytes[..]), (other.kind, &other.bytes[..]))
            }
        }

        impl Debug for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:?}{:02x?}", self.kind, &self.bytes[..])
            }
        }
        )*
    };
}

key_ordering!(CacheKey, CacheKeyRef<'_>);

/// Lets a borrowed key find an owned one in an ordered map without copying
/// its bytes.
pub trait AsCacheKey {
    fn key_ref(&self) -> CacheKeyRef<'_>;
}

impl AsCacheKey for CacheKey {
    fn key_ref(&self) -> CacheKeyRef<'_> {
        self.as_key_ref()
    }
}

impl AsCacheKey for CacheKeyRef<'_> {
    fn key_ref(&self) -> CacheKeyRef<'_> {
        *self
    }
}

impl<'a> Borrow<dyn AsCacheKey + 'a> for CacheKey {
    fn borrow(&self) -> &(dyn AsCacheKey + 'a) {
        self
    }
}

impl<'a> PartialEq for dyn AsCacheKey + 'a {
    fn eq(&self, other: &Self) -> bool {
        self.key_ref() == other.key_ref()
    }
}

impl<'a> Eq for dyn AsCacheKey + 'a {}

impl<'a> PartialOrd for dyn AsCacheKey + 'a {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Ord for dyn AsCacheKey + 'a {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key_ref().cmp(&other.key_ref())
    }
}

/// Anything a node captures. `collect` decides whether a value becomes key
/// bytes or an aggregate input; `before`/`after` swap captured values for
/// placeholders around a replayed computation.
pub trait CompiledArg {
    fn collect(&self, args: &mut CompiledNodeArgs<'_>);

    fn before(&mut self, _saved: &mut SwapSavedVariables<'_>) -> Result<(), CompiledAutogradError> {
        Ok(())
    }

    fn after(&mut self, _saved: &mut SwapSavedVariables<'_>) {}
}

macro_rules! specialize_on_le_bytes {
    ($($ty:ty),*) => {
        $(impl CompiledArg for $ty {
            fn collect(&self, args: &mut CompiledNodeArgs<'_>) {
                args.specialize_on_bytes(&self.to_le_bytes());
            }
        })*
    };
}

specialize_on_le_bytes!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl CompiledArg for bool {
    fn collect(&self, args: &mut CompiledNodeArgs<'_>) {
        args.specialize_on_bytes(&[*self as u8]);
    }
}

impl CompiledArg for usize {
    fn collect(&self, args: &mut CompiledNodeArgs<'_>) {
        (*self as u64).collect(args);
    }
}

impl CompiledArg for DType {
    fn collect(&self, args: &mut CompiledNodeArgs<'_>) {
        args.specialize_on_bytes(&[self.tag()]);
    }
}

impl CompiledArg for ScalarType {
    fn collect(&self, args: &mut CompiledNodeArgs<'_>) {
        args.specialize_on_bytes(&[*self as u8]);
    }
}

impl CompiledArg for Scalar {
    fn collect(&self, args: &mut CompiledNodeArgs<'_>) {
        self.scalar_type().collect(args);
        match self {
            Scalar::Double(x) => x.collect(args),
            Scalar::Long(x) => x.collect(args),
            Scalar::Bool(x) => x.collect(args),
        }
    }
}

impl CompiledArg for SymInt {
    fn collect(&self, args: &mut CompiledNodeArgs<'_>) {
        args.add_size_input(self.value());
    }

    fn before(&mut self, saved: &mut SwapSavedVariables<'_>) -> Result<(), CompiledAutogradError> {
        saved.before_size(self)
    }

    fn after(&mut self, saved: &mut SwapSavedVariables<'_>) {
        saved.after_size(self)
    }
}

impl CompiledArg for TypeAndSize {
    fn collect(&self, args: &mut CompiledNodeArgs<'_>) {
        args.collect(&self.sizes);
        args.collect(&self.dtype);
    }

    fn before(&mut self, saved: &mut SwapSavedVariables<'_>) -> Result<(), CompiledAutogradError> {
        self.sizes.before(saved)
    }

    fn after(&mut self, saved: &mut SwapSavedVariables<'_>) {
        self.sizes.after(saved)
    }
}

impl CompiledArg for Tensor {
    fn collect(&self, args: &mut CompiledNodeArgs<'_>) {
        args.collect(&self.is_defined());
        if self.is_defined() {
            args.add_tensor_input(self);
        }
    }

    fn before(&mut self, saved: &mut SwapSavedVariables<'_>) -> Result<(), CompiledAutogradError> {
        saved.before_tensor(self)
    }

    fn after(&mut self, saved: &mut SwapSavedVariables<'_>) {
        saved.after_tensor(self)
    }
}

impl<T: CompiledArg> CompiledArg for Vec<T> {
    fn collect(&self, args: &mut CompiledNodeArgs<'_>) {
        args.collect_size(self.len());
        for x in self {
            x.collect(args);
        }
    }

    fn before(&mut self, saved: &mut SwapSavedVariables<'_>) -> Result<(), CompiledAutogradError> {
        for x in self.iter_mut() {
            x.before(saved)?;
        }
        Ok(())
    }

    fn after(&mut self, saved: &mut SwapSavedVariables<'_>) {
        for x in self.iter_mut() {
            x.after(saved);
        }
    }
}

impl<T: CompiledArg> CompiledArg for Option<T> {
    fn collect(&self, args: &mut CompiledNodeArgs<'_>) {
        args.collect(&self.is_some());
        if let Some(x) = self {
            x.collect(args);
        }
    }

    fn before(&mut self, saved: &mut SwapSavedVariables<'_>) -> Result<(), CompiledAutogradError> {
        match self {
            Some(x) => x.before(saved),
            None => Ok(()),
        }
    }

    fn after(&mut self, saved: &mut SwapSavedVariables<'_>) {
        if let Some(x) = self {
            x.after(saved);
        }
    }
}

/// Builds the specialization key of one node call while routing tensors and
/// sizes into the aggregate compiler call.
pub struct CompiledNodeArgs<'a> {
    compiler: &'a mut AutogradCompilerCall,
    node_call: &'a mut NodeCall,
    kind: NodeKind,
    capacity: usize,
    key: Vec<u8>,
    overflowed: bool,
}

impl<'a> CompiledNodeArgs<'a> {
    pub(crate) fn new(
        compiler: &'a mut AutogradCompilerCall,
        node_call: &'a mut NodeCall,
        kind: NodeKind,
        capacity: usize,
    ) -> Self {
        Self {
            compiler,
            node_call,
            kind,
            capacity,
            key: Vec::with_capacity(capacity),
            overflowed: false,
        }
    }

    pub fn collect<T: CompiledArg + ?Sized>(&mut self, value: &T) {
        value.collect(self)
    }

    pub fn add_tensor_input(&mut self, tensor: &Tensor) {
        self.compiler.inputs.push(tensor.clone());
    }

    pub fn add_size_input(&mut self, size: i64) {
        self.compiler.size_inputs.push(size);
    }

    pub fn set_grad_target(&mut self, slot: &GradSlot) {
        self.compiler.set_grad_targets.push(slot.clone());
    }

    /// Lengths and counts: one byte below 253, otherwise a sentinel byte
    /// (253, 254, 255) followed by a 2, 4 or 8 byte little-endian value.
    pub fn collect_size(&mut self, size: usize) {
        const MAX: usize = u8::MAX as usize;
        if size >= MAX - 2 {
            if size <= u16::MAX as usize {
                self.specialize_on_bytes(&[(MAX - 2) as u8]);
                self.specialize_on_bytes(&(size as u16).to_le_bytes());
            } else if size <= u32::MAX as usize {
                self.specialize_on_bytes(&[(MAX - 1) as u8]);
                self.specialize_on_bytes(&(size as u32).to_le_bytes());
            } else {
                self.specialize_on_bytes(&[MAX as u8]);
                self.specialize_on_bytes(&(size as u64).to_le_bytes());
            }
        } else {
            self.specialize_on_bytes(&[size as u8]);
        }
    }

    /// Appends raw bytes. Exceeding the capacity poisons the builder, and
    /// [`Self::key`] then fails.
    pub fn specialize_on_bytes(&mut self, bytes: &[u8]) {
        if self.overflowed || self.key.len() + bytes.len() > self.capacity {
            self.overflowed = true;
            return;
        }
        self.key.extend_from_slice(bytes);
    }

    pub(crate) fn collect_input_refs(&mut self) {
        let refs = std::mem::take(&mut self.node_call.input_refs);
        self.collect_size(refs.len());
        for input_ref in &refs {
            // unset encodes as (0, 0)
            let (call, index) = input_ref.map_or((0, 0), |x| (x.call + 1, x.index + 1));
            self.collect_size(call);
            self.collect_size(index);
        }
        self.node_call.input_refs = refs;
    }

    pub(crate) fn collect_hooks_from(&mut self, hooks: &NodeHooks) {
        self.node_call
            .tensor_pre_hooks
            .extend(hooks.tensor_pre_hooks.iter().cloned());
        self.node_call.pre_hooks.extend(hooks.pre_hooks.iter().cloned());
        self.node_call.post_hooks.extend(hooks.post_hooks.iter().cloned());
        self.specialize_on_hook_counts();
    }

    fn specialize_on_hook_counts(&mut self) {
        let input_nrs: Vec<usize> = self
            .node_call
            .tensor_pre_hooks
            .iter()
            .map(|(_, input_nr)| *input_nr)
            .collect();
        self.collect_size(input_nrs.len());
        for input_nr in input_nrs {
            self.collect_size(input_nr);
        }
        self.collect_size(self.node_call.pre_hooks.len());
        self.collect_size(self.node_call.post_hooks.len());
    }

    pub fn key_len(&self) -> usize {
        self.key.len()
    }

    pub fn key(&self) -> Result<CacheKeyRef<'_>, CompiledAutogradError> {
        if self.overflowed {
            return Err(CompiledAutogradError::KeyOverflow {
                node: self.kind.name(),
                capacity: self.capacity,
            });
        }
        Ok(CacheKeyRef {
            kind: self.kind,
            bytes: &self.key,
        })
    }
}
