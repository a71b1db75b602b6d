use std::fs;
use std::path::Path;

use cs_io::CsvReadOptions;
use serde::{Deserialize, Serialize};

use crate::AnalysisError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Field delimiter of uploaded delimited text.
    pub csv_delimiter: char,
    /// Outcome column whose distribution is compared.
    pub target_column: String,
    /// Rows shown by [`crate::Session::preview`].
    pub preview_rows: usize,
    pub filtered_data_stem: String,
    pub raw_summary_stem: String,
    pub filtered_summary_stem: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            csv_delimiter: ';',
            target_column: "y".to_owned(),
            preview_rows: 5,
            filtered_data_stem: "filtered_data".to_owned(),
            raw_summary_stem: "bank_raw_y".to_owned(),
            filtered_summary_stem: "bank_y".to_owned(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_str(input: &str) -> Result<Self, AnalysisError> {
        let config: Self = serde_json::from_str(input)
            .map_err(|err| AnalysisError::Config(format!("malformed config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, AnalysisError> {
        let input = fs::read_to_string(path).map_err(|err| {
            AnalysisError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&input)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        self.csv_options()?;
        if self.target_column.is_empty() {
            return Err(AnalysisError::Config("target_column must not be empty".to_owned()));
        }
        let stems = [
            &self.filtered_data_stem,
            &self.raw_summary_stem,
            &self.filtered_summary_stem,
        ];
        if stems.iter().any(|stem| stem.is_empty()) {
            return Err(AnalysisError::Config("export stems must not be empty".to_owned()));
        }
        if stems[1] == stems[2] {
            return Err(AnalysisError::Config(
                "raw and filtered summary stems must differ".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn csv_options(&self) -> Result<CsvReadOptions, AnalysisError> {
        let delimiter = u8::try_from(self.csv_delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                AnalysisError::Config(format!(
                    "csv_delimiter {:?} is not a single ASCII character",
                    self.csv_delimiter
                ))
            })?;
        Ok(CsvReadOptions { delimiter })
    }
}
