use crate::compiler::CompiledAutogradError;
use crate::compiler::key::CompiledNodeArgs;
use crate::compiler::swap::SwapSavedVariables;
use crate::graph::{Edge, GraphNode, NodeHooks};
use crate::nodes::{grad_along, node_common, single_grad};
use crate::tensor::{Tensor, TensorError};

pub struct NegBackward {
    next_edges: Vec<Edge>,
    hooks: NodeHooks,
}

impl NegBackward {
    pub fn new(self_edge: Edge) -> Self {
        Self {
            next_edges: vec![self_edge],
            hooks: NodeHooks::default(),
        }
    }
}

impl GraphNode for NegBackward {
    node_common!();

    fn num_inputs(&self) -> usize {
        1
    }

    fn compiled_args(&self, _args: &mut CompiledNodeArgs<'_>) {}

    fn apply(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, TensorError> {
        let grad = single_grad(inputs);
        Ok(vec![grad_along(&self.next_edges[0], &grad, |g| g.neg())?])
    }

    fn apply_with_saved(
        &mut self,
        inputs: Vec<Tensor>,
        _saved: &mut SwapSavedVariables<'_>,
    ) -> Result<Vec<Tensor>, CompiledAutogradError> {
        Ok(self.apply(inputs)?)
    }
}
