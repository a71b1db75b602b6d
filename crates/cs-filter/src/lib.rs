#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;

use cs_columnar::{Column, ColumnError, RowMask};
use cs_frame::{FrameError, Table};
use cs_types::{CategoryValue, DType, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric column restricted by the range selection.
pub const AGE_COLUMN: &str = "age";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnIssue {
    Absent,
    NotNumeric(DType),
}

impl fmt::Display for ColumnIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "column is absent"),
            Self::NotNumeric(dtype) => write!(f, "column has non-numeric dtype {dtype:?}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("column {column:?} not usable: {issue}")]
    ColumnNotFound { column: String, issue: ColumnIssue },
    #[error("invalid range selection: lo={lo} must not exceed hi={hi}")]
    InvalidRange { lo: f64, hi: f64 },
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl FilterError {
    /// Column named by a `ColumnNotFound` error.
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::ColumnNotFound { column, .. } => Some(column),
            _ => None,
        }
    }
}

/// Categorical filter for one column. `All` and an explicit empty set are
/// different selections: the first keeps every row, the second none.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum Selection {
    #[default]
    All,
    Values(BTreeSet<CategoryValue>),
}

impl Selection {
    pub fn values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<CategoryValue>,
    {
        Self::Values(values.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Whether a single cell passes. Missing cells only pass `All`.
    #[must_use]
    pub fn admits(&self, value: &Scalar) -> bool {
        match self {
            Self::All => true,
            Self::Values(accepted) => accepted
                .iter()
                .any(|category| value.matches_category(category)),
        }
    }
}

/// Closed interval `[lo, hi]` over a numeric column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RangeSelection {
    lo: f64,
    hi: f64,
}

impl RangeSelection {
    pub fn new(lo: f64, hi: f64) -> Result<Self, FilterError> {
        // Written so that NaN bounds are rejected too.
        if !(lo <= hi) {
            return Err(FilterError::InvalidRange { lo, hi });
        }
        Ok(Self { lo, hi })
    }

    #[must_use]
    pub fn lo(&self) -> f64 {
        self.lo
    }

    #[must_use]
    pub fn hi(&self) -> f64 {
        self.hi
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.lo <= value && value <= self.hi
    }
}

/// The categorical columns of the contact dataset, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalField {
    Job,
    Marital,
    Default,
    Housing,
    Loan,
    Contact,
    Month,
    DayOfWeek,
}

impl CategoricalField {
    pub const ALL: [Self; 8] = [
        Self::Job,
        Self::Marital,
        Self::Default,
        Self::Housing,
        Self::Loan,
        Self::Contact,
        Self::Month,
        Self::DayOfWeek,
    ];

    #[must_use]
    pub fn column_name(self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Marital => "marital",
            Self::Default => "default",
            Self::Housing => "housing",
            Self::Loan => "loan",
            Self::Contact => "contact",
            Self::Month => "month",
            Self::DayOfWeek => "day_of_week",
        }
    }

    #[must_use]
    pub fn from_column_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.column_name() == name)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CategoricalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// One age range plus one selection per [`CategoricalField`]. Built up front
/// and never changed while the pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterPipelineConfiguration {
    age: RangeSelection,
    categorical: [Selection; 8],
}

impl FilterPipelineConfiguration {
    /// Configuration restricting only age; every categorical selection is `All`.
    #[must_use]
    pub fn new(age: RangeSelection) -> Self {
        Self {
            age,
            categorical: Default::default(),
        }
    }

    /// Full age range and no categorical restriction.
    #[must_use]
    pub fn unrestricted(options: &FilterOptions) -> Self {
        Self::new(options.age_range())
    }

    #[must_use]
    pub fn with_age(mut self, age: RangeSelection) -> Self {
        self.age = age;
        self
    }

    #[must_use]
    pub fn with_selection(mut self, field: CategoricalField, selection: Selection) -> Self {
        self.categorical[field.slot()] = selection;
        self
    }

    #[must_use]
    pub fn age(&self) -> &RangeSelection {
        &self.age
    }

    #[must_use]
    pub fn selection(&self, field: CategoricalField) -> &Selection {
        &self.categorical[field.slot()]
    }

    /// Categorical selections in evaluation order.
    pub fn selections(&self) -> impl Iterator<Item = (CategoricalField, &Selection)> {
        CategoricalField::ALL
            .into_iter()
            .map(|field| (field, self.selection(field)))
    }
}

/// What the widget layer may offer for a loaded table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOptions {
    pub age_min: i64,
    pub age_max: i64,
    pub categories: Vec<(CategoricalField, Vec<CategoryValue>)>,
}

impl FilterOptions {
    /// Integer age bounds plus the distinct values (first-seen order) of each
    /// categorical column.
    pub fn from_table(table: &Table) -> Result<Self, FilterError> {
        let age = numeric_column(table, AGE_COLUMN)?;
        let (lo, hi) = age.numeric_bounds().unwrap_or((0.0, 0.0));

        let categories = CategoricalField::ALL
            .into_iter()
            .map(|field| {
                let column = require_column(table, field.column_name())?;
                Ok((field, column.distinct_values()))
            })
            .collect::<Result<Vec<_>, FilterError>>()?;

        Ok(Self {
            age_min: lo.floor() as i64,
            age_max: hi.ceil() as i64,
            categories,
        })
    }

    #[must_use]
    pub fn age_range(&self) -> RangeSelection {
        RangeSelection {
            lo: self.age_min as f64,
            hi: self.age_max as f64,
        }
    }

    #[must_use]
    pub fn values_for(&self, field: CategoricalField) -> &[CategoryValue] {
        self.categories
            .iter()
            .find(|(candidate, _)| *candidate == field)
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }
}

fn require_column<'a>(table: &'a Table, name: &str) -> Result<&'a Column, FilterError> {
    table
        .column(name)
        .ok_or_else(|| FilterError::ColumnNotFound {
            column: name.to_owned(),
            issue: ColumnIssue::Absent,
        })
}

fn numeric_column<'a>(table: &'a Table, name: &str) -> Result<&'a Column, FilterError> {
    let column = require_column(table, name)?;
    // An all-missing column carries no dtype; every row simply fails the range.
    if !(column.dtype().is_numeric() || column.dtype() == DType::Null) {
        return Err(FilterError::ColumnNotFound {
            column: name.to_owned(),
            issue: ColumnIssue::NotNumeric(column.dtype()),
        });
    }
    Ok(column)
}

/// Row `i` passes iff `lo <= table[column][i] <= hi`. Missing cells never pass.
pub fn evaluate_range(
    table: &Table,
    column: &str,
    range: &RangeSelection,
) -> Result<RowMask, FilterError> {
    let values = numeric_column(table, column)?;
    let bits = values
        .values()
        .iter()
        .map(|value| {
            !value.is_missing()
                && value
                    .to_f64()
                    .is_ok_and(|numeric| range.contains(numeric))
        })
        .collect();
    Ok(RowMask::from_bits(bits))
}

/// `All` passes every row; `Values(set)` passes rows whose cell is in `set`.
pub fn evaluate_categorical(
    table: &Table,
    column: &str,
    selection: &Selection,
) -> Result<RowMask, FilterError> {
    let values = require_column(table, column)?;
    match selection {
        Selection::All => Ok(RowMask::all(table.row_count())),
        Selection::Values(accepted) if accepted.is_empty() => {
            Ok(RowMask::none(table.row_count()))
        }
        Selection::Values(_) => Ok(RowMask::from_bits(
            values
                .values()
                .iter()
                .map(|value| selection.admits(value))
                .collect(),
        )),
    }
}

/// Apply the age range and every categorical selection, in fixed order, and
/// return the rows passing all of them. The first failing predicate aborts
/// the whole pipeline.
pub fn apply(table: &Table, config: &FilterPipelineConfiguration) -> Result<Table, FilterError> {
    let mut mask = evaluate_range(table, AGE_COLUMN, config.age())?;
    for (field, selection) in config.selections() {
        let next = evaluate_categorical(table, field.column_name(), selection)?;
        mask = mask.and(&next)?;
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        rows_in = table.row_count(),
        rows_out = mask.count_selected(),
        "filter pipeline applied"
    );

    Ok(table.filter_rows(&mask)?)
}
