use crate::compiler::CompiledAutogradError;
use crate::compiler::key::CompiledNodeArgs;
use crate::compiler::swap::SwapSavedVariables;
use crate::graph::{Edge, GraphNode, NodeHooks};
use crate::nodes::{grad_along, node_common, single_grad};
use crate::tensor::{Scalar, Tensor, TensorError};

/// Backward of `self + alpha * other`.
pub struct AddBackward {
    alpha: Option<Scalar>,
    next_edges: Vec<Edge>,
    hooks: NodeHooks,
}

impl AddBackward {
    pub fn new(alpha: Option<Scalar>, self_edge: Edge, other_edge: Edge) -> Self {
        Self {
            alpha,
            next_edges: vec![self_edge, other_edge],
            hooks: NodeHooks::default(),
        }
    }

    fn compute(&self, grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
        let grad_self = grad_along(&self.next_edges[0], grad, |g| Ok(g.clone()))?;
        let grad_other = grad_along(&self.next_edges[1], grad, |g| match self.alpha {
            Some(alpha) => g.mul_scalar(alpha.to_f64()),
            None => Ok(g.clone()),
        })?;
        Ok(vec![grad_self, grad_other])
    }
}

impl GraphNode for AddBackward {
    node_common!();

    fn num_inputs(&self) -> usize {
        1
    }

    fn compiled_args(&self, args: &mut CompiledNodeArgs<'_>) {
        args.collect(&self.alpha);
    }

    fn apply(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, TensorError> {
        self.compute(&single_grad(inputs))
    }

    fn apply_with_saved(
        &mut self,
        inputs: Vec<Tensor>,
        saved: &mut SwapSavedVariables<'_>,
    ) -> Result<Vec<Tensor>, CompiledAutogradError> {
        let outputs = saved
            .before(&mut self.alpha)
            .and_then(|()| Ok(self.compute(&single_grad(inputs))?));
        saved.after(&mut self.alpha);
        outputs
    }
}
