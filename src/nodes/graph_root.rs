use crate::compiler::CompiledAutogradError;
use crate::compiler::key::CompiledNodeArgs;
use crate::compiler::swap::SwapSavedVariables;
use crate::graph::{Edge, GraphNode, NodeHooks};
use crate::nodes::node_common;
use crate::tensor::{Tensor, TensorError};

/// Entry point of a backward pass. Emits the seed gradients of the roots.
pub struct GraphRoot {
    outputs: Vec<Tensor>,
    next_edges: Vec<Edge>,
    hooks: NodeHooks,
}

impl GraphRoot {
    /// One seed gradient per edge.
    pub fn new(outputs: Vec<Tensor>, next_edges: Vec<Edge>) -> Self {
        Self {
            outputs,
            next_edges,
            hooks: NodeHooks::default(),
        }
    }
}

impl GraphNode for GraphRoot {
    node_common!();

    fn num_inputs(&self) -> usize {
        0
    }

    fn compiled_args(&self, args: &mut CompiledNodeArgs<'_>) {
        args.collect(&self.outputs);
    }

    fn apply(&mut self, _inputs: Vec<Tensor>) -> Result<Vec<Tensor>, TensorError> {
        Ok(self.outputs.clone())
    }

    fn apply_with_saved(
        &mut self,
        _inputs: Vec<Tensor>,
        saved: &mut SwapSavedVariables<'_>,
    ) -> Result<Vec<Tensor>, CompiledAutogradError> {
        let outputs = saved.before(&mut self.outputs).map(|()| self.outputs.clone());
        saved.after(&mut self.outputs);
        outputs
    }
}
