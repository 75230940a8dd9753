use crate::tensor::{BinaryOp, TensorData};
use crate::trace_graph::ops::{AnyTraceOp, TraceOp, get_value};
use crate::trace_graph::{CaptureGraph, TraceGraphError, TraceTensorId};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct TraceBinary {
    output: TraceTensorId,
    which_op: BinaryOp,
    a: TraceTensorId,
    b: TraceTensorId,
}

impl TraceBinary {
    pub fn new(
        graph: &mut CaptureGraph,
        which_op: BinaryOp,
        a: TraceTensorId,
        b: TraceTensorId,
    ) -> TraceTensorId {
        let output = graph.get_new_tensor_id();
        let node = Self {
            output,
            which_op,
            a,
            b,
        };
        graph.push_op(AnyTraceOp::Binary(node));
        output
    }
}

impl TraceOp for TraceBinary {
    fn inputs(&self) -> Vec<TraceTensorId> {
        vec![self.a, self.b]
    }

    fn output(&self) -> TraceTensorId {
        self.output
    }

    fn eval(
        &self,
        values: &HashMap<TraceTensorId, Rc<TensorData>>,
        _sizes: &[i64],
    ) -> Result<TensorData, TraceGraphError> {
        let a = get_value(values, self.a)?;
        let b = get_value(values, self.b)?;
        Ok(a.binary(b, self.which_op)?)
    }

    fn get_name(&self) -> String {
        self.which_op.name().to_string()
    }
}
