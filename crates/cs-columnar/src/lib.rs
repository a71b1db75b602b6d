#![forbid(unsafe_code)]

use std::collections::HashSet;

use cs_types::{CategoryValue, DType, Scalar, TypeError, cast_scalar_owned, infer_dtype};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<bool>,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let bits = values.iter().map(|value| !value.is_missing()).collect();
        Self { bits }
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }
}

/// Row inclusion mask. Its length is the row count of the table it was
/// built for; masks of different lengths never combine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMask {
    bits: Vec<bool>,
}

impl RowMask {
    #[must_use]
    pub fn all(len: usize) -> Self {
        Self {
            bits: vec![true; len],
        }
    }

    #[must_use]
    pub fn none(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    #[must_use]
    pub fn from_bits(bits: Vec<bool>) -> Self {
        Self { bits }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    #[must_use]
    pub fn count_selected(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }

    #[must_use]
    pub fn all_selected(&self) -> bool {
        self.bits.iter().all(|bit| *bit)
    }

    pub fn and(&self, other: &Self) -> Result<Self, ColumnError> {
        if self.len() != other.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: other.len(),
            });
        }

        let bits = self
            .bits
            .iter()
            .zip(&other.bits)
            .map(|(left, right)| *left && *right)
            .collect();
        Ok(Self { bits })
    }

    /// Positions of selected rows, ascending.
    #[must_use]
    pub fn positions(&self) -> Vec<usize> {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(idx, bit)| bit.then_some(idx))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("row position {position} out of bounds for column of length {len}")]
    PositionOutOfBounds { position: usize, len: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl Column {
    /// Construct a column, coercing values to the target dtype. Values that
    /// already carry the dtype are moved without cloning.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let coerced = values
            .into_iter()
            .map(|value| match value {
                Scalar::Null(_) => Ok(Scalar::missing_for_dtype(dtype)),
                other => cast_scalar_owned(other, dtype),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let validity = ValidityMask::from_values(&coerced);

        Ok(Self {
            dtype,
            values: coerced,
            validity,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values);
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    /// Gather rows by position, keeping the dtype.
    pub fn take(&self, positions: &[usize]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|&position| {
                self.values
                    .get(position)
                    .cloned()
                    .ok_or(ColumnError::PositionOutOfBounds {
                        position,
                        len: self.values.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            dtype: self.dtype,
            validity: ValidityMask::from_values(&values),
            values,
        })
    }

    /// Minimum and maximum of the non-missing values of a numeric column.
    /// `None` when the column is not numeric or holds no values.
    #[must_use]
    pub fn numeric_bounds(&self) -> Option<(f64, f64)> {
        if !self.dtype.is_numeric() {
            return None;
        }

        self.values
            .iter()
            .filter(|value| !value.is_missing())
            .filter_map(|value| value.to_f64().ok())
            .fold(None, |acc, value| match acc {
                None => Some((value, value)),
                Some((lo, hi)) => Some((lo.min(value), hi.max(value))),
            })
    }

    /// Distinct non-missing values in first-seen order.
    #[must_use]
    pub fn distinct_values(&self) -> Vec<CategoryValue> {
        let mut seen = HashSet::new();
        let mut ordering = Vec::new();
        for value in &self.values {
            if let Some(category) = value.category_value()
                && seen.insert(category.clone())
            {
                ordering.push(category);
            }
        }
        ordering
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| left.semantic_eq(right))
    }
}

#[cfg(test)]
mod tests {
    use cs_types::{CategoryValue, DType, NullKind, Scalar};

    use super::{Column, ColumnError, RowMask};

    #[test]
    fn take_gathers_rows_in_requested_order() {
        let column = Column::from_values(vec![
            Scalar::Int64(10),
            Scalar::Int64(20),
            Scalar::Int64(30),
        ])
        .expect("column should build");

        let out = column.take(&[2, 0]).expect("take should work");
        assert_eq!(out.values(), &[Scalar::Int64(30), Scalar::Int64(10)]);
        assert_eq!(out.dtype(), DType::Int64);

        let err = column.take(&[3]).expect_err("out of bounds");
        assert_eq!(err, ColumnError::PositionOutOfBounds { position: 3, len: 3 });
    }

    #[test]
    fn missing_values_follow_column_dtype() {
        let column = Column::from_values(vec![
            Scalar::Int64(1),
            Scalar::Null(NullKind::Null),
            Scalar::Float64(2.5),
        ])
        .expect("column");

        assert_eq!(column.dtype(), DType::Float64);
        assert_eq!(column.values()[0], Scalar::Float64(1.0));
        assert_eq!(column.values()[1], Scalar::Null(NullKind::NaN));
        assert_eq!(column.validity().bits(), &[true, false, true]);
    }

    #[test]
    fn numeric_bounds_skip_missing_values() {
        let column = Column::from_values(vec![
            Scalar::Int64(40),
            Scalar::Null(NullKind::Null),
            Scalar::Int64(18),
            Scalar::Int64(95),
        ])
        .expect("column");
        assert_eq!(column.numeric_bounds(), Some((18.0, 95.0)));

        let words = Column::from_values(vec![Scalar::Utf8("a".to_owned())]).expect("words");
        assert_eq!(words.numeric_bounds(), None);
    }

    #[test]
    fn distinct_values_keep_first_seen_order() {
        let column = Column::from_values(vec![
            Scalar::Utf8("married".to_owned()),
            Scalar::Utf8("single".to_owned()),
            Scalar::Null(NullKind::Null),
            Scalar::Utf8("married".to_owned()),
        ])
        .expect("column");

        assert_eq!(
            column.distinct_values(),
            vec![CategoryValue::from("married"), CategoryValue::from("single")]
        );
    }

    #[test]
    fn row_masks_combine_with_and() {
        let left = RowMask::from_bits(vec![true, true, false]);
        let right = RowMask::from_bits(vec![true, false, false]);

        let out = left.and(&right).expect("same length");
        assert_eq!(out.bits(), &[true, false, false]);
        assert_eq!(out.positions(), vec![0]);
        assert_eq!(out.count_selected(), 1);

        let err = left.and(&RowMask::all(2)).expect_err("length mismatch");
        assert_eq!(err, ColumnError::LengthMismatch { left: 3, right: 2 });
    }

    #[test]
    fn column_json_keeps_dtype_and_missing_cells() {
        let column = Column::from_values(vec![
            Scalar::Utf8("cellular".to_owned()),
            Scalar::Null(NullKind::Null),
        ])
        .expect("column");

        let json = serde_json::to_string(&column).expect("serialize");
        let back: Column = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, column);
        assert_eq!(back.validity().bits(), &[true, false]);
    }
}
