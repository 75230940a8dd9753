use crate::tensor::TensorData;
use crate::trace_graph::ops::{AnyTraceOp, TraceOp};
use crate::trace_graph::{CaptureGraph, TraceGraphError, TraceTensorId};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct TraceConstant {
    output: TraceTensorId,
    value: Rc<TensorData>,
}

impl TraceConstant {
    pub fn new(graph: &mut CaptureGraph, value: Rc<TensorData>) -> TraceTensorId {
        let output = graph.get_new_tensor_id();
        graph.push_op(AnyTraceOp::Constant(Self { output, value }));
        output
    }
}

impl TraceOp for TraceConstant {
    fn inputs(&self) -> Vec<TraceTensorId> {
        vec![]
    }

    fn output(&self) -> TraceTensorId {
        self.output
    }

    fn eval(
        &self,
        _values: &HashMap<TraceTensorId, Rc<TensorData>>,
        _sizes: &[i64],
    ) -> Result<TensorData, TraceGraphError> {
        Ok(self.value.as_ref().clone())
    }

    fn get_name(&self) -> String {
        "Constant".to_string()
    }
}
