use crate::dtype::{DType, DTypeError};
use crate::trace_graph::ops::{TraceBinary, TraceConstant, TraceExpand, TraceSumToSize, TraceUnary};
use crate::trace_graph::{CaptureGraph, TraceSize, TraceTensorId};
use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    #[error("{0} received an undefined tensor")]
    Undefined(&'static str),
    #[error("Shape mismatch in {0}: {1:?} vs {2:?}")]
    ShapeMismatch(&'static str, Vec<usize>, Vec<usize>),
    #[error("Dtype mismatch in {0}: {1} vs {2}")]
    DTypeMismatch(&'static str, DType, DType),
    #[error("{0} combined values from two different capture graphs")]
    ForeignTrace(&'static str),
    #[error("Traced tensors hold no values")]
    TracedValue,
    #[error(transparent)]
    DTypeError(#[from] DTypeError),
    #[error(transparent)]
    Layout(#[from] ndarray::ShapeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Mul,
}

impl BinaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::Mul => "Mul",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    MulScalar(f64),
    Cast(DType),
}

impl UnaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "Neg",
            UnaryOp::MulScalar(_) => "MulScalar",
            UnaryOp::Cast(_) => "Cast",
        }
    }

    fn output_dtype(&self, input: DType) -> DType {
        match self {
            UnaryOp::Cast(dtype) => *dtype,
            _ => input,
        }
    }
}

/// Concrete tensor storage. Values are held as f64 but always rounded to what
/// `dtype` can represent.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    values: ArrayD<f64>,
    dtype: DType,
}

impl TensorData {
    pub fn new(values: ArrayD<f64>, dtype: DType) -> Result<Self, TensorError> {
        let shape = values.shape().to_vec();
        let rounded = values
            .iter()
            .map(|x| dtype.round(*x))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            values: ArrayD::from_shape_vec(IxDyn(&shape), rounded)?,
            dtype,
        })
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().cloned().collect()
    }

    pub(crate) fn binary(&self, other: &TensorData, which: BinaryOp) -> Result<TensorData, TensorError> {
        binary_shape(which.name(), self.shape(), other.shape())?;
        let dtype = binary_dtype(which.name(), self.dtype, other.dtype)?;
        let values = match which {
            BinaryOp::Add => &self.values + &other.values,
            BinaryOp::Mul => &self.values * &other.values,
        };
        TensorData::new(values, dtype)
    }

    pub(crate) fn unary(&self, which: UnaryOp) -> Result<TensorData, TensorError> {
        let values = match which {
            UnaryOp::Neg => self.values.mapv(|x| -x),
            UnaryOp::MulScalar(scalar) => self.values.mapv(|x| x * scalar),
            UnaryOp::Cast(_) => self.values.clone(),
        };
        TensorData::new(values, which.output_dtype(self.dtype))
    }

    pub(crate) fn expand(&self, shape: &[usize]) -> Result<TensorData, TensorError> {
        expand_shape("Expand", self.shape(), shape)?;
        let values = self
            .values
            .broadcast(IxDyn(shape))
            .ok_or_else(|| {
                TensorError::ShapeMismatch("Expand", self.shape().to_vec(), shape.to_vec())
            })?
            .to_owned();
        Ok(TensorData {
            values,
            dtype: self.dtype,
        })
    }

    pub(crate) fn sum_to_size(&self, shape: &[usize]) -> Result<TensorData, TensorError> {
        sum_to_shape("SumToSize", self.shape(), shape)?;
        let mut values = self.values.clone();
        for _ in 0..(self.shape().len() - shape.len()) {
            values = values.sum_axis(Axis(0));
        }
        for (axis, dim) in shape.iter().enumerate() {
            if *dim == 1 && values.shape()[axis] != 1 {
                values = values.sum_axis(Axis(axis)).insert_axis(Axis(axis));
            }
        }
        TensorData::new(values, self.dtype)
    }
}

pub(crate) fn binary_shape(
    name: &'static str,
    a: &[usize],
    b: &[usize],
) -> Result<Vec<usize>, TensorError> {
    if a != b {
        return Err(TensorError::ShapeMismatch(name, a.to_vec(), b.to_vec()));
    }
    Ok(a.to_vec())
}

pub(crate) fn binary_dtype(name: &'static str, a: DType, b: DType) -> Result<DType, TensorError> {
    if a != b {
        return Err(TensorError::DTypeMismatch(name, a, b));
    }
    Ok(a)
}

/// Checks that `from` broadcasts to `to` (numpy rules, right aligned).
pub(crate) fn expand_shape(
    name: &'static str,
    from: &[usize],
    to: &[usize],
) -> Result<Vec<usize>, TensorError> {
    let mismatch = || TensorError::ShapeMismatch(name, from.to_vec(), to.to_vec());
    if from.len() > to.len() {
        return Err(mismatch());
    }
    let offset = to.len() - from.len();
    for (i, dim) in from.iter().enumerate() {
        if *dim != 1 && *dim != to[offset + i] {
            return Err(mismatch());
        }
    }
    Ok(to.to_vec())
}

pub(crate) fn sum_to_shape(
    name: &'static str,
    from: &[usize],
    to: &[usize],
) -> Result<Vec<usize>, TensorError> {
    expand_shape(name, to, from)
        .map_err(|_| TensorError::ShapeMismatch(name, from.to_vec(), to.to_vec()))?;
    Ok(to.to_vec())
}

/// A placeholder standing in for a real value while a capture graph records.
#[derive(Clone)]
pub struct TracedTensor {
    id: TraceTensorId,
    shape: Vec<usize>,
    dtype: DType,
    graph: Rc<RefCell<CaptureGraph>>,
}

impl TracedTensor {
    pub(crate) fn new(
        id: TraceTensorId,
        shape: Vec<usize>,
        dtype: DType,
        graph: Rc<RefCell<CaptureGraph>>,
    ) -> Self {
        Self {
            id,
            shape,
            dtype,
            graph,
        }
    }

    pub fn id(&self) -> TraceTensorId {
        self.id
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn belongs_to(&self, graph: &Rc<RefCell<CaptureGraph>>) -> bool {
        Rc::ptr_eq(&self.graph, graph)
    }
}

impl Debug for TracedTensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracedTensor")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .finish()
    }
}

#[derive(Debug, Clone)]
enum TensorRepr {
    Concrete(Rc<TensorData>),
    Traced(TracedTensor),
}

impl TensorRepr {
    fn shape(&self) -> &[usize] {
        match self {
            TensorRepr::Concrete(x) => x.shape(),
            TensorRepr::Traced(x) => x.shape(),
        }
    }

    fn dtype(&self) -> DType {
        match self {
            TensorRepr::Concrete(x) => x.dtype(),
            TensorRepr::Traced(x) => x.dtype(),
        }
    }
}

/// A gradient value. May be undefined (no gradient flows), concrete, or a
/// traced placeholder recorded into a capture graph.
#[derive(Debug, Clone, Default)]
pub struct Tensor {
    repr: Option<TensorRepr>,
}

impl From<TensorData> for Tensor {
    fn from(value: TensorData) -> Self {
        Tensor {
            repr: Some(TensorRepr::Concrete(Rc::new(value))),
        }
    }
}

impl From<Rc<TensorData>> for Tensor {
    fn from(value: Rc<TensorData>) -> Self {
        Tensor {
            repr: Some(TensorRepr::Concrete(value)),
        }
    }
}

impl From<TracedTensor> for Tensor {
    fn from(value: TracedTensor) -> Self {
        Tensor {
            repr: Some(TensorRepr::Traced(value)),
        }
    }
}

impl Tensor {
    pub fn undefined() -> Self {
        Self::default()
    }

    pub fn from_vec(values: Vec<f64>, shape: Vec<usize>, dtype: DType) -> Result<Self, TensorError> {
        let values = ArrayD::from_shape_vec(IxDyn(&shape), values)?;
        Ok(TensorData::new(values, dtype)?.into())
    }

    pub fn scalar(value: f64, dtype: DType) -> Result<Self, TensorError> {
        Self::from_vec(vec![value], vec![], dtype)
    }

    pub fn is_defined(&self) -> bool {
        self.repr.is_some()
    }

    pub fn is_traced(&self) -> bool {
        matches!(self.repr, Some(TensorRepr::Traced(_)))
    }

    pub fn shape(&self) -> Option<&[usize]> {
        self.repr.as_ref().map(|x| x.shape())
    }

    pub fn dtype(&self) -> Option<DType> {
        self.repr.as_ref().map(|x| x.dtype())
    }

    pub fn as_traced(&self) -> Option<&TracedTensor> {
        match &self.repr {
            Some(TensorRepr::Traced(x)) => Some(x),
            _ => None,
        }
    }

    pub fn data(&self) -> Result<&Rc<TensorData>, TensorError> {
        match &self.repr {
            Some(TensorRepr::Concrete(x)) => Ok(x),
            Some(TensorRepr::Traced(_)) => Err(TensorError::TracedValue),
            None => Err(TensorError::Undefined("data")),
        }
    }

    pub fn to_vec(&self) -> Result<Vec<f64>, TensorError> {
        Ok(self.data()?.to_vec())
    }

    pub fn add(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        self.binary(other, BinaryOp::Add)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        self.binary(other, BinaryOp::Mul)
    }

    pub fn neg(&self) -> Result<Tensor, TensorError> {
        self.unary(UnaryOp::Neg)
    }

    pub fn mul_scalar(&self, scalar: f64) -> Result<Tensor, TensorError> {
        self.unary(UnaryOp::MulScalar(scalar))
    }

    pub fn to_dtype(&self, dtype: DType) -> Result<Tensor, TensorError> {
        self.unary(UnaryOp::Cast(dtype))
    }

    /// Broadcasts to `sizes`. Traced tensors record symbolic sizes by
    /// reference, so the recording follows whatever sizes it is later run with.
    pub fn expand(&self, sizes: &[SymInt]) -> Result<Tensor, TensorError> {
        let input = self.repr("Expand")?;
        let shape = SymInt::shape(sizes);
        if let TensorRepr::Concrete(x) = input {
            return Ok(x.expand(&shape)?.into());
        }
        let out_shape = expand_shape("Expand", input.shape(), &shape)?;
        record("Expand", &[input], out_shape, input.dtype(), |graph, ids| {
            TraceExpand::new(graph, ids[0], sizes.iter().map(TraceSize::from).collect())
        })
    }

    /// Sums away the broadcast dimensions so the result has `sizes`.
    pub fn sum_to_size(&self, sizes: &[SymInt]) -> Result<Tensor, TensorError> {
        let input = self.repr("SumToSize")?;
        let shape = SymInt::shape(sizes);
        if let TensorRepr::Concrete(x) = input {
            return Ok(x.sum_to_size(&shape)?.into());
        }
        let out_shape = sum_to_shape("SumToSize", input.shape(), &shape)?;
        record("SumToSize", &[input], out_shape, input.dtype(), |graph, ids| {
            TraceSumToSize::new(graph, ids[0], sizes.iter().map(TraceSize::from).collect())
        })
    }

    fn repr(&self, name: &'static str) -> Result<&TensorRepr, TensorError> {
        self.repr.as_ref().ok_or(TensorError::Undefined(name))
    }

    fn binary(&self, other: &Tensor, which: BinaryOp) -> Result<Tensor, TensorError> {
        let a = self.repr(which.name())?;
        let b = other.repr(which.name())?;
        if let (TensorRepr::Concrete(a), TensorRepr::Concrete(b)) = (a, b) {
            return Ok(a.binary(b, which)?.into());
        }
        let shape = binary_shape(which.name(), a.shape(), b.shape())?;
        let dtype = binary_dtype(which.name(), a.dtype(), b.dtype())?;
        record(which.name(), &[a, b], shape, dtype, |graph, ids| {
            TraceBinary::new(graph, which, ids[0], ids[1])
        })
    }

    fn unary(&self, which: UnaryOp) -> Result<Tensor, TensorError> {
        let input = self.repr(which.name())?;
        if let TensorRepr::Concrete(x) = input {
            return Ok(x.unary(which)?.into());
        }
        let dtype = which.output_dtype(input.dtype());
        record(which.name(), &[input], input.shape().to_vec(), dtype, |graph, ids| {
            TraceUnary::new(graph, which, ids[0])
        })
    }
}

/// Records one op into the capture graph shared by the traced operands.
/// Concrete operands are lifted into constants of that graph.
fn record(
    name: &'static str,
    operands: &[&TensorRepr],
    shape: Vec<usize>,
    dtype: DType,
    push: impl FnOnce(&mut CaptureGraph, &[TraceTensorId]) -> TraceTensorId,
) -> Result<Tensor, TensorError> {
    let mut graph: Option<Rc<RefCell<CaptureGraph>>> = None;
    for operand in operands {
        if let TensorRepr::Traced(x) = operand {
            match graph.as_ref().map(|g| x.belongs_to(g)) {
                Some(false) => return Err(TensorError::ForeignTrace(name)),
                Some(true) => {}
                None => graph = Some(x.graph.clone()),
            }
        }
    }
    let graph = graph.ok_or(TensorError::TracedValue)?;
    let id = {
        let mut g = graph.borrow_mut();
        let ids: Vec<_> = operands
            .iter()
            .map(|operand| match operand {
                TensorRepr::Traced(x) => x.id,
                TensorRepr::Concrete(x) => TraceConstant::new(&mut *g, x.clone()),
            })
            .collect();
        push(&mut *g, &ids)
    };
    Ok(TracedTensor::new(id, shape, dtype, graph).into())
}

/// A pure-size value (a dimension, stride or offset). Its concrete value is
/// routed to the size inputs and never becomes part of a specialization key.
/// While a capture records, it may also name the size input it stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymInt {
    value: i64,
    symbol: Option<usize>,
}

impl SymInt {
    pub fn new(value: i64) -> Self {
        Self {
            value,
            symbol: None,
        }
    }

    /// Size input `symbol` of a capture, currently holding `value`.
    pub fn symbolic(value: i64, symbol: usize) -> Self {
        Self {
            value,
            symbol: Some(symbol),
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn symbol(&self) -> Option<usize> {
        self.symbol
    }

    pub fn as_usize(&self) -> usize {
        self.value.max(0) as usize
    }

    pub fn from_shape(shape: &[usize]) -> Vec<SymInt> {
        shape.iter().map(|x| SymInt::new(*x as i64)).collect()
    }

    pub fn shape(sizes: &[SymInt]) -> Vec<usize> {
        sizes.iter().map(|x| x.as_usize()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[repr(u8)]
pub enum ScalarType {
    Double = 0,
    Long = 1,
    Bool = 2,
}

/// A tagged number captured by a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Double(f64),
    Long(i64),
    Bool(bool),
}

impl Scalar {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Scalar::Double(_) => ScalarType::Double,
            Scalar::Long(_) => ScalarType::Long,
            Scalar::Bool(_) => ScalarType::Bool,
        }
    }

    pub fn to_f64(&self) -> f64 {
        match self {
            Scalar::Double(x) => *x,
            Scalar::Long(x) => *x as f64,
            Scalar::Bool(x) => {
                if *x {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Sizes plus dtype of a tensor a node needs to reproduce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAndSize {
    pub sizes: Vec<SymInt>,
    pub dtype: DType,
}

impl TypeAndSize {
    pub fn new(sizes: &[usize], dtype: DType) -> Self {
        Self {
            sizes: SymInt::from_shape(sizes),
            dtype,
        }
    }

    pub fn of(tensor: &Tensor) -> Option<Self> {
        Some(Self::new(tensor.shape()?, tensor.dtype()?))
    }

    pub fn shape(&self) -> Vec<usize> {
        SymInt::shape(&self.sizes)
    }
}

/// Collaborator-owned gradient slot of a leaf variable.
#[derive(Debug, Clone, Default)]
pub struct GradSlot(Rc<RefCell<Tensor>>);

impl GradSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grad(&self) -> Tensor {
        self.0.borrow().clone()
    }

    pub fn set_grad(&self, grad: Tensor) {
        *self.0.borrow_mut() = grad;
    }

    pub fn ptr_eq(&self, other: &GradSlot) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
