use crate::compiler::CompiledAutogradError;
use crate::compiler::key::CompiledNodeArgs;
use crate::compiler::swap::SwapSavedVariables;
use crate::graph::{Edge, GraphNode, NodeHooks};
use crate::nodes::{grad_along, node_common, single_grad};
use crate::tensor::{SymInt, Tensor, TensorError};

/// Backward of a full reduction: broadcasts the gradient back to the input sizes.
pub struct SumBackward {
    self_sym_sizes: Vec<SymInt>,
    next_edges: Vec<Edge>,
    hooks: NodeHooks,
}

impl SumBackward {
    pub fn new(self_sizes: &[usize], self_edge: Edge) -> Self {
        Self {
            self_sym_sizes: SymInt::from_shape(self_sizes),
            next_edges: vec![self_edge],
            hooks: NodeHooks::default(),
        }
    }
}

impl GraphNode for SumBackward {
    node_common!();

    fn num_inputs(&self) -> usize {
        1
    }

    fn compiled_args(&self, args: &mut CompiledNodeArgs<'_>) {
        args.collect(&self.self_sym_sizes);
    }

    fn apply(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, TensorError> {
        let grad = single_grad(inputs);
        let sizes = &self.self_sym_sizes;
        Ok(vec![grad_along(&self.next_edges[0], &grad, |g| g.expand(sizes))?])
    }

    fn apply_with_saved(
        &mut self,
        inputs: Vec<Tensor>,
        saved: &mut SwapSavedVariables<'_>,
    ) -> Result<Vec<Tensor>, CompiledAutogradError> {
        let outputs = saved
            .before(&mut self.self_sym_sizes)
            .and_then(|()| Ok(self.apply(inputs)?));
        saved.after(&mut self.self_sym_sizes);
        outputs
    }
}

/// Backward of a broadcast: sums the gradient back down to the input sizes.
pub struct ExpandBackward {
    self_sym_sizes: Vec<SymInt>,
    next_edges: Vec<Edge>,
    hooks: NodeHooks,
}

impl ExpandBackward {
    pub fn new(self_sizes: &[usize], self_edge: Edge) -> Self {
        Self {
            self_sym_sizes: SymInt::from_shape(self_sizes),
            next_edges: vec![self_edge],
            hooks: NodeHooks::default(),
        }
    }
}

impl GraphNode for ExpandBackward {
    node_common!();

    fn num_inputs(&self) -> usize {
        1
    }

    fn compiled_args(&self, args: &mut CompiledNodeArgs<'_>) {
        args.collect(&self.self_sym_sizes);
    }

    fn apply(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, TensorError> {
        let grad = single_grad(inputs);
        let sizes = &self.self_sym_sizes;
        Ok(vec![grad_along(&self.next_edges[0], &grad, |g| g.sum_to_size(sizes))?])
    }

    fn apply_with_saved(
        &mut self,
        inputs: Vec<Tensor>,
        saved: &mut SwapSavedVariables<'_>,
    ) -> Result<Vec<Tensor>, CompiledAutogradError> {
        let outputs = saved
            .before(&mut self.self_sym_sizes)
            .and_then(|()| Ok(self.apply(inputs)?));
        saved.after(&mut self.self_sym_sizes);
        outputs
    }
}
