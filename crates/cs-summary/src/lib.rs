#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use cs_columnar::{Column, ColumnError};
use cs_frame::{FrameError, Table};
use cs_types::{CategoryValue, DType, Scalar};
use serde::Serialize;
use thiserror::Error;

/// Column holding the percentage share in [`DistributionSummary::to_table`].
pub const PERCENTAGE_COLUMN: &str = "percentage";

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("target column {0:?} not found")]
    ColumnNotFound(String),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Percentage share of each distinct target value, ordered by value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionSummary {
    target: String,
    entries: Vec<(CategoryValue, f64)>,
}

impl DistributionSummary {
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn entries(&self) -> &[(CategoryValue, f64)] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, value: &CategoryValue) -> Option<f64> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == value)
            .map(|(_, pct)| *pct)
    }

    #[must_use]
    pub fn total_percentage(&self) -> f64 {
        self.entries.iter().map(|(_, pct)| pct).sum()
    }

    /// Two-column table (`<target>`, `percentage`) for export.
    pub fn to_table(&self) -> Result<Table, SummaryError> {
        let label_dtype = self
            .entries
            .first()
            .map_or(DType::Utf8, |(value, _)| value.to_scalar().dtype());
        let labels = Column::new(
            label_dtype,
            self.entries
                .iter()
                .map(|(value, _)| value.to_scalar())
                .collect(),
        )?;
        let shares = Column::new(
            DType::Float64,
            self.entries
                .iter()
                .map(|(_, pct)| Scalar::Float64(*pct))
                .collect(),
        )?;

        Ok(Table::new(vec![
            (self.target.clone(), labels),
            (PERCENTAGE_COLUMN.to_owned(), shares),
        ])?)
    }
}

/// Percentage breakdown of `target` over `table`: `100 * count / total` for
/// each distinct value, ascending by value.
///
/// Missing cells form no group and do not count towards the total, so the
/// shares of a table with at least one present value sum to 100. A table
/// with no present values yields an empty summary.
pub fn summarize(table: &Table, target: &str) -> Result<DistributionSummary, SummaryError> {
    let column = table
        .column(target)
        .ok_or_else(|| SummaryError::ColumnNotFound(target.to_owned()))?;

    let mut counts = BTreeMap::<CategoryValue, usize>::new();
    for value in column.values() {
        if let Some(key) = value.category_value() {
            *counts.entry(key).or_insert(0) += 1;
        }
    }

    let total: usize = counts.values().sum();
    let entries = if total == 0 {
        Vec::new()
    } else {
        counts
            .into_iter()
            .map(|(key, count)| (key, 100.0 * count as f64 / total as f64))
            .collect()
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(
        target_column = target,
        rows = table.row_count(),
        groups = entries.len(),
        "distribution summarized"
    );

    Ok(DistributionSummary {
        target: target.to_owned(),
        entries,
    })
}
