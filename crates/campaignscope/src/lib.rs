#![forbid(unsafe_code)]

//! Contact-list analysis for marketing campaigns: load an uploaded table,
//! narrow it with an age range and categorical selections, compare the
//! outcome distribution before and after filtering, and export the results.
//!
//! [`Session`] runs the stages with memoization, so re-running an unchanged
//! configuration reuses every earlier result.

mod config;
mod session;

use std::fmt;

pub use config::AnalysisConfig;
pub use cs_columnar::{Column, ColumnError, RowMask, ValidityMask};
pub use cs_filter::{
    AGE_COLUMN, CategoricalField, ColumnIssue, FilterError, FilterOptions,
    FilterPipelineConfiguration, RangeSelection, Selection, apply, evaluate_categorical,
    evaluate_range,
};
pub use cs_frame::{FrameError, Table, TableId};
pub use cs_io::{
    CsvReadOptions, ExportArtifact, ExportFormat, IoError, SHEET_NAME, load, read_csv_str,
    read_xlsx_bytes, write_csv_bytes, write_xlsx_bytes,
};
pub use cs_runtime::{
    CacheKey, Fingerprint, FingerprintBuilder, MemoCache, MemoStats, RuntimeError, SessionId,
};
pub use cs_summary::{DistributionSummary, PERCENTAGE_COLUMN, SummaryError, summarize};
pub use cs_types::{CategoryValue, DType, FloatKey, NullKind, Scalar, TypeError};
pub use session::{AnalysisReport, CacheStats, PipelineCaches, Session};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the two outcome distributions are presented. Carried through the
/// pipeline untouched; rendering belongs to the presentation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    #[default]
    Bar,
    Pie,
}

impl ChartKind {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "bar" => Some(Self::Bar),
            "pie" => Some(Self::Pie),
            _ => None,
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bar => "bar",
            Self::Pie => "pie",
        })
    }
}

/// Which table a summary was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Raw,
    Filtered,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Raw => "raw",
            Self::Filtered => "filtered",
        })
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("load failed: {0}")]
    Load(#[source] IoError),
    #[error("filter failed: {0}")]
    Filter(#[from] FilterError),
    #[error("summary of the {branch} table failed: {source}")]
    Summarize {
        branch: Branch,
        #[source]
        source: SummaryError,
    },
    #[error("export of {file_name} failed: {source}")]
    Export {
        file_name: String,
        #[source]
        source: IoError,
    },
    #[error(transparent)]
    Table(#[from] FrameError),
    #[error(transparent)]
    Fingerprint(#[from] RuntimeError),
}

impl AnalysisError {
    /// Pipeline stage that failed.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) => "configure",
            Self::Load(_) => "load",
            Self::Filter(_) => "filter",
            Self::Summarize { .. } => "summarize",
            Self::Export { .. } => "export",
            Self::Table(_) => "table",
            Self::Fingerprint(_) => "memoize",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AnalysisError, ChartKind, FilterError, IoError};

    #[test]
    fn chart_kind_parses_case_insensitively() {
        assert_eq!(ChartKind::parse("Pie"), Some(ChartKind::Pie));
        assert_eq!(ChartKind::parse(" bar "), Some(ChartKind::Bar));
        assert_eq!(ChartKind::parse("line"), None);
        assert_eq!(ChartKind::default(), ChartKind::Bar);
    }

    #[test]
    fn errors_name_their_stage() {
        let load = AnalysisError::Load(IoError::MissingHeaders);
        assert_eq!(load.stage(), "load");
        assert_eq!(load.to_string(), "load failed: csv input has no headers");

        let filter = AnalysisError::from(FilterError::InvalidRange { lo: 5.0, hi: 1.0 });
        assert_eq!(filter.stage(), "filter");
    }
}
