use crate::compiler::CompiledAutogradError;
use crate::compiler::key::CompiledNodeArgs;
use crate::compiler::swap::SwapSavedVariables;
use crate::graph::{Edge, GraphNode, NodeHooks};
use crate::nodes::{grad_along, node_common, single_grad};
use crate::tensor::{Scalar, Tensor, TensorError};

/// Backward of `self * other`. Each operand is saved to scale the other's gradient.
pub struct MulBackward {
    self_: Tensor,
    other: Tensor,
    next_edges: Vec<Edge>,
    hooks: NodeHooks,
}

impl MulBackward {
    pub fn new(self_: Tensor, other: Tensor, self_edge: Edge, other_edge: Edge) -> Self {
        Self {
            self_,
            other,
            next_edges: vec![self_edge, other_edge],
            hooks: NodeHooks::default(),
        }
    }

    fn compute(&self, grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
        let grad_self = grad_along(&self.next_edges[0], grad, |g| g.mul(&self.other))?;
        let grad_other = grad_along(&self.next_edges[1], grad, |g| g.mul(&self.self_))?;
        Ok(vec![grad_self, grad_other])
    }
}

impl GraphNode for MulBackward {
    node_common!();

    fn num_inputs(&self) -> usize {
        1
    }

    fn compiled_args(&self, args: &mut CompiledNodeArgs<'_>) {
        args.collect(&self.other);
        args.collect(&self.self_);
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
            .before(&mut self.other)
            .and_then(|()| saved.before(&mut self.self_))
            .and_then(|()| Ok(self.compute(&single_grad(inputs))?));
        saved.after(&mut self.other);
        saved.after(&mut self.self_);
        outputs
    }

    fn release_variables(&mut self) {
        self.self_ = Tensor::undefined();
        self.other = Tensor::undefined();
    }
}

/// Backward of `self * other` for a number `other`.
pub struct MulScalarBackward {
    other: Scalar,
    next_edges: Vec<Edge>,
    hooks: NodeHooks,
}

impl MulScalarBackward {
    pub fn new(other: Scalar, self_edge: Edge) -> Self {
        Self {
            other,
            next_edges: vec![self_edge],
            hooks: NodeHooks::default(),
        }
    }
}

impl GraphNode for MulScalarBackward {
    node_common!();

    fn num_inputs(&self) -> usize {
        1
    }

    fn compiled_args(&self, args: &mut CompiledNodeArgs<'_>) {
        args.collect(&self.other);
    }

    fn apply(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, TensorError> {
        let grad = single_grad(inputs);
        let other = self.other.to_f64();
        Ok(vec![grad_along(&self.next_edges[0], &grad, |g| g.mul_scalar(other))?])
    }

    fn apply_with_saved(
        &mut self,
        inputs: Vec<Tensor>,
        saved: &mut SwapSavedVariables<'_>,
    ) -> Result<Vec<Tensor>, CompiledAutogradError> {
        let outputs = saved
            .before(&mut self.other)
            .and_then(|()| Ok(self.apply(inputs)?));
        saved.after(&mut self.other);
        outputs
    }
}
