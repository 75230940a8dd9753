use crate::dtype::DType;
use crate::tensor::{SymInt, TensorData, TensorError};
use crate::trace_graph::ops::{AnyTraceOp, TraceOp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;

pub mod ops;

#[derive(Debug, thiserror::Error)]
pub enum TraceGraphError {
    #[error(transparent)]
    TensorError(#[from] TensorError),
    #[error("Expected {0} inputs, got {1}")]
    InputCount(usize, usize),
    #[error("Expected {0} size inputs, got {1}")]
    SizeCount(usize, usize),
    #[error("Input {index} was captured as {expected_dtype} of rank {expected_rank}, got {dtype} {shape:?}")]
    InputGuard {
        index: usize,
        expected_rank: usize,
        expected_dtype: DType,
        shape: Vec<usize>,
        dtype: DType,
    },
    #[error("Tensor {0:?} was read before it was produced")]
    MissingTensor(TraceTensorId),
    #[error("Size input {0} is out of range")]
    MissingSize(usize),
    #[error("Size input {0} holds the negative value {1}")]
    NegativeSize(usize, i64),
}

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct TraceTensorId {
    inner: usize,
}

/// One dimension of a recorded shape op: fixed when recorded, or read from
/// the size inputs every time the graph runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceSize {
    Fixed(usize),
    Input(usize),
}

impl TraceSize {
    pub fn resolve(&self, sizes: &[i64]) -> Result<usize, TraceGraphError> {
        match *self {
            TraceSize::Fixed(x) => Ok(x),
            TraceSize::Input(i) => {
                let value = *sizes.get(i).ok_or(TraceGraphError::MissingSize(i))?;
                usize::try_from(value).map_err(|_| TraceGraphError::NegativeSize(i, value))
            }
        }
    }
}

impl From<&SymInt> for TraceSize {
    fn from(value: &SymInt) -> Self {
        match value.symbol() {
            Some(i) => TraceSize::Input(i),
            None => TraceSize::Fixed(value.as_usize()),
        }
    }
}

/// A tensor input; `shape` is what it held when recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceInput {
    pub id: TraceTensorId,
    pub shape: Vec<usize>,
    pub dtype: DType,
}

/// Straight-line op list recorded while placeholders flow through a replay.
/// Ops are evaluated in recording order, which is always a valid topological order.
/// Input shapes are not fixed: only rank and dtype are guarded, and shape ops
/// read their symbolic dimensions from the size inputs.
#[derive(Debug, Clone, Default)]
pub struct CaptureGraph {
    inputs: Vec<TraceInput>,
    size_inputs: Vec<i64>,
    ops: Vec<AnyTraceOp>,
    next_tensor_id: usize,
}

impl CaptureGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, shape: Vec<usize>, dtype: DType) -> TraceTensorId {
        let id = self.get_new_tensor_id();
        self.inputs.push(TraceInput { id, shape, dtype });
        id
    }

    /// Registers a size input and returns its index.
    pub fn add_size_input(&mut self, value: i64) -> usize {
        self.size_inputs.push(value);
        self.size_inputs.len() - 1
    }

    pub fn get_new_tensor_id(&mut self) -> TraceTensorId {
        let new_id = TraceTensorId {
            inner: self.next_tensor_id,
        };
        self.next_tensor_id += 1;
        new_id
    }

    pub fn push_op(&mut self, op: AnyTraceOp) {
        self.ops.push(op);
    }

    pub fn inputs(&self) -> &[TraceInput] {
        &self.inputs
    }

    /// Size input values seen while recording.
    pub fn size_inputs(&self) -> &[i64] {
        &self.size_inputs
    }

    pub fn ops(&self) -> impl Iterator<Item = &AnyTraceOp> {
        self.ops.iter()
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub(crate) fn eval(
        &self,
        inputs: &[Rc<TensorData>],
        sizes: &[i64],
    ) -> Result<HashMap<TraceTensorId, Rc<TensorData>>, TraceGraphError> {
        if inputs.len() != self.inputs.len() {
            return Err(TraceGraphError::InputCount(self.inputs.len(), inputs.len()));
        }
        if sizes.len() != self.size_inputs.len() {
            return Err(TraceGraphError::SizeCount(self.size_inputs.len(), sizes.len()));
        }

        let mut intermediate_values = HashMap::new();
        for (index, (input, value)) in self.inputs.iter().zip(inputs).enumerate() {
            if input.shape.len() != value.shape().len() || input.dtype != value.dtype() {
                return Err(TraceGraphError::InputGuard {
                    index,
                    expected_rank: input.shape.len(),
                    expected_dtype: input.dtype,
                    shape: value.shape().to_vec(),
                    dtype: value.dtype(),
                });
            }
            intermediate_values.insert(input.id, value.clone());
        }

        for op in &self.ops {
            let value = op.eval(&intermediate_values, sizes)?;
            log::trace!("Evaluated {} -> {:?}", op.get_name(), op.output());
            intermediate_values.insert(op.output(), Rc::new(value));
        }

        Ok(intermediate_values)
    }
}
