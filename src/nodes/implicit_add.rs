use crate::compiler::CompiledAutogradError;
use crate::compiler::key::CompiledNodeArgs;
use crate::compiler::swap::SwapSavedVariables;
use crate::graph::{Edge, GraphNode, NodeHooks, NodeKind};
use crate::tensor::{Tensor, TensorError};

/// Sum of two gradients headed for the same input. Undefined operands
/// contribute nothing.
pub(crate) fn accumulate(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    match (a.is_defined(), b.is_defined()) {
        (true, true) => a.add(b),
        (true, false) => Ok(a.clone()),
        _ => Ok(b.clone()),
    }
}

/// Fan-in accumulation inserted while flattening. Never part of a graph.
#[derive(Debug, Clone, Default)]
pub struct ImplicitAdd {
    hooks: NodeHooks,
}

impl ImplicitAdd {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphNode for ImplicitAdd {
    fn kind(&self) -> NodeKind {
        NodeKind::of::<Self>()
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn next_edges(&self) -> &[Edge] {
        &[]
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn hooks(&self) -> &NodeHooks {
        &self.hooks
    }

    fn hooks_mut(&mut self) -> &mut NodeHooks {
        &mut self.hooks
    }

    fn compiled_args(&self, _args: &mut CompiledNodeArgs<'_>) {}

    fn apply(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, TensorError> {
        let undefined = Tensor::undefined();
        let a = inputs.first().unwrap_or(&undefined);
        let b = inputs.get(1).unwrap_or(&undefined);
        Ok(vec![accumulate(a, b)?])
    }

    fn apply_with_saved(
        &mut self,
        inputs: Vec<Tensor>,
        _saved: &mut SwapSavedVariables<'_>,
    ) -> Result<Vec<Tensor>, CompiledAutogradError> {
        Ok(self.apply(inputs)?)
    }
}
