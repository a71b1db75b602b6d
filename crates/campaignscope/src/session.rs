use std::sync::Arc;

use cs_filter::{FilterOptions, FilterPipelineConfiguration};
use cs_frame::Table;
use cs_io::{ExportArtifact, ExportFormat};
use cs_runtime::{CacheKey, FingerprintBuilder, MemoCache, MemoStats, SessionId};
use cs_summary::DistributionSummary;
use serde::Serialize;

use crate::{AnalysisConfig, AnalysisError, Branch, ChartKind};

/// Result caches for every pipeline stage. One set may back many sessions;
/// entries are namespaced by [`SessionId`].
#[derive(Debug, Default)]
pub struct PipelineCaches {
    tables: MemoCache<Arc<Table>>,
    summaries: MemoCache<Arc<DistributionSummary>>,
    exports: MemoCache<Arc<ExportArtifact>>,
}

impl PipelineCaches {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            tables: self.tables.stats(),
            summaries: self.summaries.stats(),
            exports: self.exports.stats(),
        }
    }
}

/// Hit and miss counters per cache. `tables` holds both loaded and filtered
/// tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub tables: MemoStats,
    pub summaries: MemoStats,
    pub exports: MemoStats,
}

/// Everything the presentation layer shows after a recompute.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub filtered: Arc<Table>,
    pub raw_summary: Arc<DistributionSummary>,
    pub filtered_summary: Arc<DistributionSummary>,
    pub chart: ChartKind,
    pub exports: Vec<Arc<ExportArtifact>>,
}

impl AnalysisReport {
    #[must_use]
    pub fn export(&self, file_name: &str) -> Option<&ExportArtifact> {
        self.exports
            .iter()
            .map(AsRef::as_ref)
            .find(|artifact| artifact.file_name == file_name)
    }
}

/// One user's analysis session. Cloning shares the namespace and caches.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    config: AnalysisConfig,
    caches: Arc<PipelineCaches>,
}

impl Session {
    /// A session with its own caches.
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        Self::with_caches(config, Arc::new(PipelineCaches::new()))
    }

    /// A fresh namespace inside caches shared with other sessions.
    pub fn with_caches(
        config: AnalysisConfig,
        caches: Arc<PipelineCaches>,
    ) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            id: SessionId::fresh(),
            config,
            caches,
        })
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.caches.stats()
    }

    /// Decode uploaded bytes into a table.
    pub fn load(&self, bytes: &[u8]) -> Result<Arc<Table>, AnalysisError> {
        let options = self.config.csv_options()?;
        let args = FingerprintBuilder::new()
            .bytes(bytes)
            .serialized(&options)?
            .finish();
        self.caches
            .tables
            .get_or_try_compute(CacheKey::new(self.id, "load", args), || {
                let table = cs_io::load(bytes, &options).map_err(AnalysisError::Load)?;
                #[cfg(feature = "tracing")]
                tracing::info!(
                    session = %self.id,
                    rows = table.row_count(),
                    columns = table.column_names().len(),
                    table = %table.id(),
                    "table loaded"
                );
                Ok(Arc::new(table))
            })
    }

    /// Widget bounds and choices for `table`.
    pub fn filter_options(&self, table: &Table) -> Result<FilterOptions, AnalysisError> {
        Ok(FilterOptions::from_table(table)?)
    }

    /// Rows of `table` passing every selection in `filters`.
    pub fn filter(
        &self,
        table: &Table,
        filters: &FilterPipelineConfiguration,
    ) -> Result<Arc<Table>, AnalysisError> {
        let args = FingerprintBuilder::new()
            .bytes(table.id().as_bytes())
            .serialized(filters)?
            .finish();
        self.caches
            .tables
            .get_or_try_compute(CacheKey::new(self.id, "apply", args), || {
                Ok(Arc::new(cs_filter::apply(table, filters)?))
            })
    }

    /// Outcome distribution of `table` over the configured target column.
    pub fn summarize(
        &self,
        table: &Table,
        branch: Branch,
    ) -> Result<Arc<DistributionSummary>, AnalysisError> {
        let target = self.config.target_column.as_str();
        let args = FingerprintBuilder::new()
            .bytes(table.id().as_bytes())
            .bytes(target.as_bytes())
            .finish();
        self.caches
            .summaries
            .get_or_try_compute(CacheKey::new(self.id, "summarize", args), || {
                cs_summary::summarize(table, target)
                    .map(Arc::new)
                    .map_err(|source| AnalysisError::Summarize { branch, source })
            })
    }

    /// Encode `table` as `<stem>.<ext>`.
    pub fn export_table(
        &self,
        table: &Table,
        stem: &str,
        format: ExportFormat,
    ) -> Result<Arc<ExportArtifact>, AnalysisError> {
        let args = FingerprintBuilder::new()
            .bytes(table.id().as_bytes())
            .bytes(stem.as_bytes())
            .serialized(&format)?
            .finish();
        self.caches
            .exports
            .get_or_try_compute(CacheKey::new(self.id, "export", args), || {
                ExportArtifact::encode(stem, format, table)
                    .map(Arc::new)
                    .map_err(|source| AnalysisError::Export {
                        file_name: format!("{stem}.{}", format.extension()),
                        source,
                    })
            })
    }

    /// Export a summary as a two-column table.
    pub fn export_summary(
        &self,
        summary: &DistributionSummary,
        branch: Branch,
        stem: &str,
        format: ExportFormat,
    ) -> Result<Arc<ExportArtifact>, AnalysisError> {
        let table = summary
            .to_table()
            .map_err(|source| AnalysisError::Summarize { branch, source })?;
        self.export_table(&table, stem, format)
    }

    /// First rows of `table`, as shown beneath the upload widget.
    pub fn preview(&self, table: &Table) -> Result<Table, AnalysisError> {
        Ok(table.head(self.config.preview_rows)?)
    }

    /// Run the whole pipeline for one widget state: filter, summarize both
    /// tables and encode every export. Any failing stage aborts the run.
    pub fn recompute(
        &self,
        raw: &Table,
        filters: &FilterPipelineConfiguration,
        chart: ChartKind,
    ) -> Result<AnalysisReport, AnalysisError> {
        let filtered = self.filter(raw, filters)?;
        let raw_summary = self.summarize(raw, Branch::Raw)?;
        let filtered_summary = self.summarize(&filtered, Branch::Filtered)?;

        let mut exports = Vec::with_capacity(3 * ExportFormat::ALL.len());
        for format in ExportFormat::ALL {
            exports.push(self.export_table(&filtered, &self.config.filtered_data_stem, format)?);
        }
        for format in ExportFormat::ALL {
            exports.push(self.export_summary(
                &raw_summary,
                Branch::Raw,
                &self.config.raw_summary_stem,
                format,
            )?);
        }
        for format in ExportFormat::ALL {
            exports.push(self.export_summary(
                &filtered_summary,
                Branch::Filtered,
                &self.config.filtered_summary_stem,
                format,
            )?);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            session = %self.id,
            rows_in = raw.row_count(),
            rows_out = filtered.row_count(),
            %chart,
            "analysis recomputed"
        );

        Ok(AnalysisReport {
            filtered,
            raw_summary,
            filtered_summary,
            chart,
            exports,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cs_filter::{CategoricalField, FilterPipelineConfiguration, RangeSelection, Selection};
    use cs_io::ExportFormat;

    use super::{PipelineCaches, Session};
    use crate::{AnalysisConfig, AnalysisError, Branch, ChartKind};

    const CONTACTS: &str = "\
age;job;marital;default;housing;loan;contact;month;day_of_week;y
25;admin.;single;no;yes;no;cellular;may;mon;yes
40;blue-collar;married;no;no;no;telephone;jun;tue;no
60;retired;married;unknown;yes;yes;cellular;may;wed;yes
33;admin.;divorced;no;yes;no;cellular;jul;thu;no
";

    fn age_between(lo: f64, hi: f64) -> FilterPipelineConfiguration {
        FilterPipelineConfiguration::new(RangeSelection::new(lo, hi).expect("range"))
    }

    fn session() -> Session {
        Session::new(AnalysisConfig::default()).expect("session")
    }

    #[test]
    fn repeated_load_hits_the_cache() {
        let session = session();
        let first = session.load(CONTACTS.as_bytes()).expect("load");
        let second = session.load(CONTACTS.as_bytes()).expect("load again");
        assert!(Arc::ptr_eq(&first, &second));
        let stats = session.cache_stats().tables;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn recompute_reuses_every_stage() {
        let session = session();
        let raw = session.load(CONTACTS.as_bytes()).expect("load");
        let filters = age_between(20.0, 50.0);

        let first = session.recompute(&raw, &filters, ChartKind::Pie).expect("first");
        let before = session.cache_stats();
        let second = session.recompute(&raw, &filters, ChartKind::Pie).expect("second");
        let after = session.cache_stats();

        assert!(Arc::ptr_eq(&first.filtered, &second.filtered));
        assert_eq!(after.tables.misses, before.tables.misses);
        assert_eq!(after.summaries.misses, before.summaries.misses);
        assert_eq!(after.exports.misses, before.exports.misses);
        assert_eq!(first.exports.len(), 6);
        assert_eq!(first.chart, ChartKind::Pie);
    }

    #[test]
    fn report_names_every_export() {
        let session = session();
        let raw = session.load(CONTACTS.as_bytes()).expect("load");
        let filters = age_between(0.0, 100.0);
        let report = session.recompute(&raw, &filters, ChartKind::Bar).expect("report");

        for name in [
            "filtered_data.csv",
            "filtered_data.xlsx",
            "bank_raw_y.csv",
            "bank_raw_y.xlsx",
            "bank_y.csv",
            "bank_y.xlsx",
        ] {
            assert!(report.export(name).is_some(), "missing {name}");
        }
        let summary_csv = report.export("bank_y.csv").expect("csv");
        assert_eq!(
            std::str::from_utf8(&summary_csv.bytes).expect("utf8"),
            "y,percentage\nno,50.0\nyes,50.0\n"
        );
        assert_eq!(summary_csv.mime_type(), ExportFormat::Csv.mime_type());
    }

    #[test]
    fn missing_target_fails_the_raw_branch() {
        let config = AnalysisConfig {
            target_column: "outcome".to_owned(),
            ..AnalysisConfig::default()
        };
        let session = Session::new(config).expect("session");
        let raw = session.load(CONTACTS.as_bytes()).expect("load");
        let filters = age_between(0.0, 100.0);

        let err = session.recompute(&raw, &filters, ChartKind::Bar).expect_err("no target");
        assert!(matches!(
            err,
            AnalysisError::Summarize {
                branch: Branch::Raw,
                ..
            }
        ));
        assert_eq!(err.stage(), "summarize");
    }

    #[test]
    fn sessions_sharing_caches_stay_isolated() {
        let caches = Arc::new(PipelineCaches::new());
        let left =
            Session::with_caches(AnalysisConfig::default(), Arc::clone(&caches)).expect("left");
        let right = Session::with_caches(AnalysisConfig::default(), caches).expect("right");
        assert_ne!(left.id(), right.id());

        left.load(CONTACTS.as_bytes()).expect("left load");
        right.load(CONTACTS.as_bytes()).expect("right load");
        let stats = right.cache_stats().tables;
        assert_eq!((stats.hits, stats.misses, stats.entries), (0, 2, 2));
    }

    #[test]
    fn filter_respects_categorical_selection() {
        let session = session();
        let raw = session.load(CONTACTS.as_bytes()).expect("load");
        let filters = age_between(0.0, 100.0)
            .with_selection(CategoricalField::Job, Selection::values(["admin."]));
        let filtered = session.filter(&raw, &filters).expect("filter");
        assert_eq!(filtered.row_count(), 2);

        let preview = session.preview(&raw).expect("preview");
        assert_eq!(preview.row_count(), 4);
    }

    #[test]
    fn undecodable_upload_is_a_load_error() {
        let err = session().load(&[0xff, 0xfe, 0x00]).expect_err("garbage");
        assert_eq!(err.stage(), "load");
    }
}
