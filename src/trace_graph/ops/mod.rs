mod binary;
mod constant;
mod shape;
mod unary;

pub use binary::*;
pub use constant::*;
pub use shape::*;
pub use unary::*;

use crate::tensor::TensorData;
use crate::trace_graph::{TraceGraphError, TraceTensorId};
use std::collections::HashMap;
use std::rc::Rc;

pub trait TraceOp {
    fn inputs(&self) -> Vec<TraceTensorId>;

    fn output(&self) -> TraceTensorId;

    fn eval(
        &self,
        values: &HashMap<TraceTensorId, Rc<TensorData>>,
        sizes: &[i64],
    ) -> Result<TensorData, TraceGraphError>;

    fn get_name(&self) -> String;
}

#[derive(Debug, Clone)]
pub enum AnyTraceOp {
    Constant(TraceConstant),
    Binary(TraceBinary),
    Unary(TraceUnary),
    Expand(TraceExpand),
    SumToSize(TraceSumToSize),
}

impl AnyTraceOp {
    fn as_trace_op(&self) -> &dyn TraceOp {
        match self {
            AnyTraceOp::Constant(x) => x,
            AnyTraceOp::Binary(x) => x,
            AnyTraceOp::Unary(x) => x,
            AnyTraceOp::Expand(x) => x,
            AnyTraceOp::SumToSize(x) => x,
        }
    }
}

impl TraceOp for AnyTraceOp {
    fn inputs(&self) -> Vec<TraceTensorId> {
        self.as_trace_op().inputs()
    }

    fn output(&self) -> TraceTensorId {
        self.as_trace_op().output()
    }

    fn eval(
        &self,
        values: &HashMap<TraceTensorId, Rc<TensorData>>,
        sizes: &[i64],
    ) -> Result<TensorData, TraceGraphError> {
        self.as_trace_op().eval(values, sizes)
    }

    fn get_name(&self) -> String {
        self.as_trace_op().get_name()
    }
}

pub(crate) fn get_value(
    values: &HashMap<TraceTensorId, Rc<TensorData>>,
    id: TraceTensorId,
) -> Result<&TensorData, TraceGraphError> {
    values
        .get(&id)
        .map(|x| x.as_ref())
        .ok_or(TraceGraphError::MissingTensor(id))
}
