use crate::graph::Edge;
use crate::tensor::{Tensor, TensorError};

mod accumulate_grad;
mod add;
mod graph_root;
mod implicit_add;
mod mul;
mod neg;
mod shape;
mod to_copy;

pub use accumulate_grad::AccumulateGrad;
pub use add::AddBackward;
pub use graph_root::GraphRoot;
pub use implicit_add::ImplicitAdd;
pub(crate) use implicit_add::accumulate;
pub use mul::{MulBackward, MulScalarBackward};
pub use neg::NegBackward;
pub use shape::{ExpandBackward, SumBackward};
pub use to_copy::ToCopyBackward;

macro_rules! node_common {
    () => {
        fn kind(&self) -> crate::graph::NodeKind {
            crate::graph::NodeKind::of::<Self>()
        }

        fn next_edges(&self) -> &[crate::graph::Edge] {
            &self.next_edges
        }

        fn hooks(&self) -> &crate::graph::NodeHooks {
            &self.hooks
        }

        fn hooks_mut(&mut self) -> &mut crate::graph::NodeHooks {
            &mut self.hooks
        }
    };
}

pub(crate) use node_common;

/// First incoming gradient, undefined when none arrived.
fn single_grad(inputs: Vec<Tensor>) -> Tensor {
    inputs.into_iter().next().unwrap_or_default()
}

/// Applies `f` only when `edge` leads somewhere and there is a gradient to pass.
fn grad_along(
    edge: &Edge,
    grad: &Tensor,
    f: impl FnOnce(&Tensor) -> Result<Tensor, TensorError>,
) -> Result<Tensor, TensorError> {
    if edge.is_valid() && grad.is_defined() {
        f(grad)
    } else {
        Ok(Tensor::undefined())
    }
}
