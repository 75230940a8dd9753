use crate::tensor::TensorData;
use crate::trace_graph::ops::{AnyTraceOp, TraceOp, get_value};
use crate::trace_graph::{CaptureGraph, TraceGraphError, TraceSize, TraceTensorId};
use std::collections::HashMap;
use std::rc::Rc;

fn resolve_shape(shape: &[TraceSize], sizes: &[i64]) -> Result<Vec<usize>, TraceGraphError> {
    shape.iter().map(|x| x.resolve(sizes)).collect()
}

#[derive(Debug, Clone)]
pub struct TraceExpand {
    output: TraceTensorId,
    input: TraceTensorId,
    shape: Vec<TraceSize>,
}

impl TraceExpand {
    pub fn new(graph: &mut CaptureGraph, input: TraceTensorId, shape: Vec<TraceSize>) -> TraceTensorId {
        let output = graph.get_new_tensor_id();
        graph.push_op(AnyTraceOp::Expand(Self {
            output,
            input,
            shape,
        }));
        output
    }
}

impl TraceOp for TraceExpand {
    fn inputs(&self) -> Vec<TraceTensorId> {
        vec![self.input]
    }

    fn output(&self) -> TraceTensorId {
        self.output
    }

    fn eval(
        &self,
        values: &HashMap<TraceTensorId, Rc<TensorData>>,
        sizes: &[i64],
    ) -> Result<TensorData, TraceGraphError> {
        Ok(get_value(values, self.input)?.expand(&resolve_shape(&self.shape, sizes)?)?)
    }

    fn get_name(&self) -> String {
        format!("Expand({:?})", self.shape)
    }
}

#[derive(Debug, Clone)]
pub struct TraceSumToSize {
    output: TraceTensorId,
    input: TraceTensorId,
    shape: Vec<TraceSize>,
}

impl TraceSumToSize {
    pub fn new(graph: &mut CaptureGraph, input: TraceTensorId, shape: Vec<TraceSize>) -> TraceTensorId {
        let output = graph.get_new_tensor_id();
        graph.push_op(AnyTraceOp::SumToSize(Self {
            output,
            input,
            shape,
        }));
        output
    }
}

impl TraceOp for TraceSumToSize {
    fn inputs(&self) -> Vec<TraceTensorId> {
        vec![self.input]
    }

    fn output(&self) -> TraceTensorId {
        self.output
    }

    fn eval(
        &self,
        values: &HashMap<TraceTensorId, Rc<TensorData>>,
        sizes: &[i64],
    ) -> Result<TensorData, TraceGraphError> {
        Ok(get_value(values, self.input)?.sum_to_size(&resolve_shape(&self.shape, sizes)?)?)
    }

    fn get_name(&self) -> String {
        format!("SumToSize({:?})", self.shape)
    }
}
