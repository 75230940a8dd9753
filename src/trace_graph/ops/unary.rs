use crate::tensor::{TensorData, UnaryOp};
use crate::trace_graph::ops::{AnyTraceOp, TraceOp, get_value};
use crate::trace_graph::{CaptureGraph, TraceGraphError, TraceTensorId};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct TraceUnary {
    output: TraceTensorId,
    which_op: UnaryOp,
    input: TraceTensorId,
}

impl TraceUnary {
    pub fn new(graph: &mut CaptureGraph, which_op: UnaryOp, input: TraceTensorId) -> TraceTensorId {
        let output = graph.get_new_tensor_id();
        graph.push_op(AnyTraceOp::Unary(Self {
            output,
            which_op,
            input,
        }));
        output
    }
}

impl TraceOp for TraceUnary {
    fn inputs(&self) -> Vec<TraceTensorId> {
        vec![self.input]
    }

    fn output(&self) -> TraceTensorId {
        self.output
    }

    fn eval(
        &self,
        values: &HashMap<TraceTensorId, Rc<TensorData>>,
        _sizes: &[i64],
    ) -> Result<TensorData, TraceGraphError> {
        Ok(get_value(values, self.input)?.unary(self.which_op)?)
    }

    fn get_name(&self) -> String {
        match self.which_op {
            UnaryOp::MulScalar(x) => format!("MulScalar({x})"),
            UnaryOp::Cast(dtype) => format!("Cast({dtype})"),
            UnaryOp::Neg => "Neg".to_string(),
        }
    }
}
