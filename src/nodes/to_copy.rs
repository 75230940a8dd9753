use crate::compiler::CompiledAutogradError;
use crate::compiler::key::CompiledNodeArgs;
use crate::compiler::swap::SwapSavedVariables;
use crate::graph::{Edge, GraphNode, NodeHooks};
use crate::nodes::{grad_along, node_common, single_grad};
use crate::tensor::{Tensor, TensorError, TypeAndSize};

/// Backward of a dtype conversion: casts the gradient back to the input's dtype.
pub struct ToCopyBackward {
    self_: TypeAndSize,
    next_edges: Vec<Edge>,
    hooks: NodeHooks,
}

impl ToCopyBackward {
    pub fn new(self_: TypeAndSize, self_edge: Edge) -> Self {
        Self {
            self_,
            next_edges: vec![self_edge],
            hooks: NodeHooks::default(),
        }
    }
}

impl GraphNode for ToCopyBackward {
    node_common!();

    fn num_inputs(&self) -> usize {
        1
    }

    fn compiled_args(&self, args: &mut CompiledNodeArgs<'_>) {
        args.collect(&self.self_);
    }

    fn apply(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, TensorError> {
        let grad = single_grad(inputs);
        let dtype = self.self_.dtype;
        Ok(vec![grad_along(&self.next_edges[0], &grad, |g| g.to_dtype(dtype))?])
    }

    fn apply_with_saved(
        &mut self,
        inputs: Vec<Tensor>,
        saved: &mut SwapSavedVariables<'_>,
    ) -> Result<Vec<Tensor>, CompiledAutogradError> {
        let outputs = saved
            .before(&mut self.self_)
            .and_then(|()| Ok(self.apply(inputs)?));
        saved.after(&mut self.self_);
        outputs
    }
}
