use half::{bf16, f16};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum DTypeError {
    #[error("The value {1} is not representable as {0}")]
    ValueNotRepresentable(DType, f64),
    #[error("Unknown dtype tag {0}")]
    UnknownTag(u8),
}

/// Element type of a tensor. The discriminant is what a specialization key
/// records, so variants must never be reordered.
#[derive(
    Copy,
    Clone,
    Debug,
    Hash,
    Eq,
    PartialEq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::EnumIter,
)]
#[repr(u8)]
pub enum DType {
    F64 = 0,
    F32 = 1,
    BF16 = 2,
    F16 = 3,
    I64 = 4,
    I32 = 5,
    I16 = 6,
    I8 = 7,
    U8 = 8,
    BOOL = 9,
}

impl DType {
    pub fn size(&self) -> usize {
        match self {
            DType::F64 => 8,
            DType::F32 => 4,
            DType::BF16 => 2,
            DType::F16 => 2,
            DType::I64 => 8,
            DType::I32 => 4,
            DType::I16 => 2,
            DType::I8 => 1,
            DType::U8 => 1,
            DType::BOOL => 1,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F64 | DType::F32 | DType::BF16 | DType::F16)
    }

    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Rounds `value` to the nearest value this dtype can hold, reported back as f64.
    pub fn round(&self, value: f64) -> Result<f64, DTypeError> {
        let rounded = match self {
            DType::F64 => Some(value),
            DType::F32 => round_through::<f32>(value),
            DType::BF16 => round_through::<bf16>(value),
            DType::F16 => round_through::<f16>(value),
            DType::I64 => round_through::<i64>(value),
            DType::I32 => round_through::<i32>(value),
            DType::I16 => round_through::<i16>(value),
            DType::I8 => round_through::<i8>(value),
            DType::U8 => round_through::<u8>(value),
            DType::BOOL => Some(if value != 0.0 { 1.0 } else { 0.0 }),
        };
        rounded.ok_or(DTypeError::ValueNotRepresentable(*self, value))
    }
}

fn round_through<T: FromPrimitive + ToPrimitive>(value: f64) -> Option<f64> {
    T::from_f64(value).and_then(|x| x.to_f64())
}

impl TryFrom<u8> for DType {
    type Error = DTypeError;
    fn try_from(tag: u8) -> Result<Self, DTypeError> {
        Ok(match tag {
            0 => DType::F64,
            1 => DType::F32,
            2 => DType::BF16,
            3 => DType::F16,
            4 => DType::I64,
            5 => DType::I32,
            6 => DType::I16,
            7 => DType::I8,
            8 => DType::U8,
            9 => DType::BOOL,
            _ => Err(DTypeError::UnknownTag(tag))?,
        })
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::F64 => write!(f, "Float64"),
            DType::F32 => write!(f, "Float32"),
            DType::BF16 => write!(f, "BFloat16"),
            DType::F16 => write!(f, "Float16"),
            DType::I64 => write!(f, "Int64"),
            DType::I32 => write!(f, "Int32"),
            DType::I16 => write!(f, "Int16"),
            DType::I8 => write!(f, "Int8"),
            DType::U8 => write!(f, "UInt8"),
            DType::BOOL => write!(f, "Bool"),
        }
    }
}

pub trait DTypeOfPrimitive {
    const DTYPE: DType;
}

impl DTypeOfPrimitive for f64 { const DTYPE: DType = DType::F64; }
impl DTypeOfPrimitive for f32 { const DTYPE: DType = DType::F32; }
impl DTypeOfPrimitive for bf16 { const DTYPE: DType = DType::BF16; }
impl DTypeOfPrimitive for f16 { const DTYPE: DType = DType::F16; }
impl DTypeOfPrimitive for i64 { const DTYPE: DType = DType::I64; }
impl DTypeOfPrimitive for i32 { const DTYPE: DType = DType::I32; }
impl DTypeOfPrimitive for i16 { const DTYPE: DType = DType::I16; }
impl DTypeOfPrimitive for i8 { const DTYPE: DType = DType::I8; }
impl DTypeOfPrimitive for u8 { const DTYPE: DType = DType::U8; }
impl DTypeOfPrimitive for bool { const DTYPE: DType = DType::BOOL; }
