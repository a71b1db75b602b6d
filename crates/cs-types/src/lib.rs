#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
}

impl DType {
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl Scalar {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null(_) => DType::Null,
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Utf8(_) => DType::Utf8,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn missing_for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::Float64 => Self::Null(NullKind::NaN),
            DType::Null | DType::Bool | DType::Int64 | DType::Utf8 => Self::Null(NullKind::Null),
        }
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => (a.is_nan() && b.is_nan()) || (a == b),
            (Self::Null(NullKind::NaN), Self::Float64(v))
            | (Self::Float64(v), Self::Null(NullKind::NaN)) => v.is_nan(),
            _ => self == other,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            Self::Null(kind) => Err(TypeError::ValueIsMissing { kind: *kind }),
            Self::Bool(v) => Err(TypeError::NonNumericValue {
                value: v.to_string(),
                dtype: DType::Bool,
            }),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                dtype: DType::Utf8,
            }),
        }
    }

    /// Categorical key of this cell, `None` for missing values.
    #[must_use]
    pub fn category_value(&self) -> Option<CategoryValue> {
        match self {
            Self::Null(_) => None,
            Self::Float64(v) if v.is_nan() => None,
            Self::Bool(v) => Some(CategoryValue::Bool(*v)),
            Self::Int64(v) => Some(CategoryValue::Int64(*v)),
            Self::Float64(v) => Some(CategoryValue::Float64(FloatKey::new(*v))),
            Self::Utf8(v) => Some(CategoryValue::Utf8(v.clone())),
        }
    }

    /// Borrowing comparison against a category key, without allocating one.
    #[must_use]
    pub fn matches_category(&self, category: &CategoryValue) -> bool {
        match (self, category) {
            (Self::Bool(a), CategoryValue::Bool(b)) => a == b,
            (Self::Int64(a), CategoryValue::Int64(b)) => a == b,
            (Self::Float64(a), CategoryValue::Float64(b)) => {
                !a.is_nan() && FloatKey::new(*a) == *b
            }
            (Self::Utf8(a), CategoryValue::Utf8(b)) => a == b,
            _ => false,
        }
    }
}

/// `f64` wrapper with a total order, so floats can key ordered sets and maps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct FloatKey(f64);

impl FloatKey {
    #[must_use]
    pub fn new(value: f64) -> Self {
        // -0.0 and 0.0 must land on the same key.
        if value == 0.0 {
            Self(0.0)
        } else {
            Self(value)
        }
    }

    #[must_use]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl From<f64> for FloatKey {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<FloatKey> for f64 {
    fn from(value: FloatKey) -> Self {
        value.0
    }
}

impl PartialEq for FloatKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FloatKey {}

impl PartialOrd for FloatKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::hash::Hash for FloatKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// A non-missing cell value used as a categorical key.
///
/// Ordering is numeric within numbers and lexicographic within strings; a
/// column only ever holds one dtype, so cross-variant order is only a tie
/// breaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CategoryValue {
    Bool(bool),
    Int64(i64),
    Float64(FloatKey),
    Utf8(String),
}

impl CategoryValue {
    #[must_use]
    pub fn to_scalar(&self) -> Scalar {
        match self {
            Self::Bool(v) => Scalar::Bool(*v),
            Self::Int64(v) => Scalar::Int64(*v),
            Self::Float64(v) => Scalar::Float64(v.get()),
            Self::Utf8(v) => Scalar::Utf8(v.clone()),
        }
    }
}

impl From<&str> for CategoryValue {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for CategoryValue {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl From<i64> for CategoryValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<bool> for CategoryValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for CategoryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{}", v.get()),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("cannot cast scalar of dtype {from:?} to {to:?}")]
    InvalidCast { from: DType, to: DType },
    #[error("cannot cast float {value} to int64 without loss")]
    LossyFloatToInt { value: f64 },
    #[error("value {value:?} has non-numeric dtype {dtype:?}")]
    NonNumericValue { value: String, dtype: DType },
    #[error("value is missing ({kind:?})")]
    ValueIsMissing { kind: NullKind },
}

/// Common dtype of two cell dtypes. Numbers widen to `Float64`; any other
/// mix widens to `Utf8` so an uploaded column never loses a cell.
#[must_use]
pub fn common_dtype(left: DType, right: DType) -> DType {
    use DType::{Float64, Int64, Null, Utf8};

    match (left, right) {
        (a, b) if a == b => a,
        (Null, other) | (other, Null) => other,
        (Int64, Float64) | (Float64, Int64) => Float64,
        _ => Utf8,
    }
}

#[must_use]
pub fn infer_dtype(values: &[Scalar]) -> DType {
    values
        .iter()
        .fold(DType::Null, |current, value| common_dtype(current, value.dtype()))
}

/// Owned cast: values already of the target dtype move through untouched.
pub fn cast_scalar_owned(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    let from = value.dtype();
    if from == target {
        return Ok(value);
    }
    if matches!(value, Scalar::Null(_)) {
        return Ok(Scalar::missing_for_dtype(target));
    }

    match (target, value) {
        (DType::Null, _) => Ok(Scalar::Null(NullKind::Null)),
        (DType::Float64, Scalar::Int64(v)) => Ok(Scalar::Float64(v as f64)),
        (DType::Int64, Scalar::Float64(v)) => {
            if !v.is_finite() || v != v.trunc() || v < i64::MIN as f64 || v > i64::MAX as f64 {
                return Err(TypeError::LossyFloatToInt { value: v });
            }
            Ok(Scalar::Int64(v as i64))
        }
        (DType::Utf8, Scalar::Bool(v)) => Ok(Scalar::Utf8(v.to_string())),
        (DType::Utf8, Scalar::Int64(v)) => Ok(Scalar::Utf8(v.to_string())),
        (DType::Utf8, Scalar::Float64(v)) => Ok(Scalar::Utf8(v.to_string())),
        _ => Err(TypeError::InvalidCast { from, to: target }),
    }
}
