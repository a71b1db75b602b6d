#![forbid(unsafe_code)]

use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use csv::{ReaderBuilder, WriterBuilder};
use cs_columnar::{Column, ColumnError};
use cs_frame::{FrameError, Table};
use cs_types::{DType, NullKind, Scalar, infer_dtype};
use rust_xlsxwriter::Workbook;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Worksheet name used for spreadsheet exports.
pub const SHEET_NAME: &str = "Sheet1";

/// Largest integer magnitude a spreadsheet number cell holds exactly.
const MAX_EXACT_SHEET_INT: u64 = 1 << 53;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error("spreadsheet has no worksheet")]
    MissingWorksheet,
    #[error("spreadsheet worksheet is empty")]
    EmptyWorksheet,
    #[error("csv row {row} has {fields} fields but the header has {expected}")]
    RaggedRow {
        row: usize,
        fields: usize,
        expected: usize,
    },
    #[error(
        "input matches no supported tabular encoding (delimited text: {text}; spreadsheet: {spreadsheet})"
    )]
    Decode {
        text: Box<IoError>,
        spreadsheet: Box<IoError>,
    },
    #[error("{format} serialization failed: {detail}")]
    Serialization { format: ExportFormat, detail: String },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Spreadsheet(#[from] calamine::XlsxError),
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvReadOptions {
    pub delimiter: u8,
}

impl CsvReadOptions {
    /// Comma separated, as written by [`write_csv_bytes`].
    #[must_use]
    pub fn comma() -> Self {
        Self { delimiter: b',' }
    }
}

impl Default for CsvReadOptions {
    /// The contact exports this tool is fed are semicolon separated.
    fn default() -> Self {
        Self { delimiter: b';' }
    }
}

/// Decode uploaded bytes: delimited text first, the first worksheet of an
/// XLSX workbook second. Fails with [`IoError::Decode`] carrying both causes.
pub fn load(bytes: &[u8], options: &CsvReadOptions) -> Result<Table, IoError> {
    let text_attempt = std::str::from_utf8(bytes)
        .map_err(IoError::from)
        .and_then(|text| read_csv_str(text, options));

    let table = match text_attempt {
        Ok(table) => table,
        Err(text) => read_xlsx_bytes(bytes).map_err(|spreadsheet| IoError::Decode {
            text: Box::new(text),
            spreadsheet: Box::new(spreadsheet),
        })?,
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(
        bytes = bytes.len(),
        rows = table.row_count(),
        columns = table.column_names().len(),
        "table loaded"
    );

    Ok(table)
}

/// Parse delimited text with a header row. Short rows are padded with
/// missing cells; rows longer than the header are rejected.
///
/// Each column is typed from all of its cells. A column that ends up as
/// text keeps every non-blank cell exactly as written, so `007` and `1.0`
/// stay distinct from `7` and `1`.
pub fn read_csv_str(input: &str, options: &CsvReadOptions) -> Result<Table, IoError> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(options.delimiter)
        .from_reader(input.as_bytes());

    let headers = reader.headers().cloned().map_err(IoError::from)?;

    if headers.is_empty() {
        return Err(IoError::MissingHeaders);
    }

    let mut columns = headers
        .iter()
        .map(|name| (name.to_owned(), Vec::<String>::new()))
        .collect::<Vec<_>>();

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() > headers.len() {
            return Err(IoError::RaggedRow {
                row: row + 1,
                fields: record.len(),
                expected: headers.len(),
            });
        }
        for (idx, (_, fields)) in columns.iter_mut().enumerate() {
            fields.push(record.get(idx).unwrap_or_default().to_owned());
        }
    }

    let columns = columns
        .into_iter()
        .map(|(name, fields)| Ok((name, text_column(fields)?)))
        .collect::<Result<Vec<_>, IoError>>()?;
    Ok(Table::new(columns)?)
}

fn text_column(fields: Vec<String>) -> Result<Column, ColumnError> {
    let parsed = fields.iter().map(|field| parse_scalar(field)).collect::<Vec<_>>();
    let dtype = infer_dtype(&parsed);
    if dtype != DType::Utf8 {
        return Column::new(dtype, parsed);
    }

    let verbatim = fields
        .into_iter()
        .map(|field| {
            if field.trim().is_empty() {
                Scalar::Null(NullKind::Null)
            } else {
                Scalar::Utf8(field)
            }
        })
        .collect();
    Column::new(DType::Utf8, verbatim)
}

/// Read the first worksheet of an XLSX workbook; its first row is the header.
pub fn read_xlsx_bytes(bytes: &[u8]) -> Result<Table, IoError> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(IoError::MissingWorksheet)??;

    let mut rows = range.rows();
    let header = rows.next().ok_or(IoError::EmptyWorksheet)?;
    let mut columns = header
        .iter()
        .map(|cell| (header_name(cell), Vec::<Scalar>::new()))
        .collect::<Vec<_>>();

    for row in rows {
        for (idx, (_, values)) in columns.iter_mut().enumerate() {
            values.push(row.get(idx).map_or(Scalar::Null(NullKind::Null), cell_scalar));
        }
    }

    // Spreadsheets store every number as a float; whole-number columns read
    // back as integers.
    let columns = columns
        .into_iter()
        .map(|(name, values)| {
            let integral = values.iter().all(|value| match value {
                Scalar::Float64(v) => {
                    v.is_finite()
                        && *v == v.trunc()
                        && *v >= i64::MIN as f64
                        && *v < i64::MAX as f64
                }
                Scalar::Null(_) => true,
                _ => false,
            }) && values.iter().any(|value| matches!(value, Scalar::Float64(_)));
            if !integral {
                return (name, values);
            }
            let values = values
                .into_iter()
                .map(|value| match value {
                    Scalar::Float64(v) => Scalar::Int64(v as i64),
                    other => other,
                })
                .collect();
            (name, values)
        })
        .collect();

    build_table(columns)
}

fn build_table(columns: Vec<(String, Vec<Scalar>)>) -> Result<Table, IoError> {
    let columns = columns
        .into_iter()
        .map(|(name, values)| Ok((name, Column::from_values(values)?)))
        .collect::<Result<Vec<_>, IoError>>()?;
    Ok(Table::new(columns)?)
}

fn header_name(cell: &Data) -> String {
    match cell {
        Data::String(name) => name.clone(),
        other => other.to_string(),
    }
}

fn cell_scalar(cell: &Data) -> Scalar {
    match cell {
        Data::Empty | Data::Error(_) => Scalar::Null(NullKind::Null),
        Data::Int(v) => Scalar::Int64(*v),
        Data::Float(v) => Scalar::Float64(*v),
        Data::Bool(v) => Scalar::Bool(*v),
        Data::String(v) if v.trim().is_empty() => Scalar::Null(NullKind::Null),
        Data::String(v) => Scalar::Utf8(v.clone()),
        other => Scalar::Utf8(other.to_string()),
    }
}

fn parse_scalar(field: &str) -> Scalar {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Scalar::Null(NullKind::Null);
    }

    if let Ok(value) = trimmed.parse::<i64>() {
        return Scalar::Int64(value);
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return Scalar::Float64(value);
    }
    if let Ok(value) = trimmed.parse::<bool>() {
        return Scalar::Bool(value);
    }

    Scalar::Utf8(trimmed.to_owned())
}

/// Comma separated text: header row of column names, one line per row, no
/// index column, missing cells as empty fields.
pub fn write_csv_bytes(table: &Table) -> Result<Vec<u8>, IoError> {
    let fault = |err: csv::Error| IoError::Serialization {
        format: ExportFormat::Csv,
        detail: err.to_string(),
    };
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    writer.write_record(table.column_names()).map_err(fault)?;

    for row_idx in 0..table.row_count() {
        let row = table
            .columns()
            .map(|(_, column)| column.value(row_idx).map_or_else(String::new, scalar_to_csv))
            .collect::<Vec<_>>();
        writer.write_record(&row).map_err(fault)?;
    }

    writer.into_inner().map_err(|err| IoError::Serialization {
        format: ExportFormat::Csv,
        detail: err.into_error().to_string(),
    })
}

fn scalar_to_csv(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Null(_) => String::new(),
        Scalar::Bool(v) => v.to_string(),
        Scalar::Int64(v) => v.to_string(),
        Scalar::Float64(v) => {
            if v.is_nan() {
                String::new()
            } else {
                format_float(*v)
            }
        }
        Scalar::Utf8(v) => v.clone(),
    }
}

/// Whole floats keep one decimal (`3.0`) so they read back as floats.
fn format_float(value: f64) -> String {
    if value.is_finite() && value == value.trunc() && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Single-sheet XLSX workbook holding the header row and every table row.
pub fn write_xlsx_bytes(table: &Table) -> Result<Vec<u8>, IoError> {
    let fault = |detail: String| IoError::Serialization {
        format: ExportFormat::Xlsx,
        detail,
    };

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name(SHEET_NAME)
        .map_err(|err| fault(err.to_string()))?;

    for (col_idx, (name, column)) in table.columns().enumerate() {
        let col = u16::try_from(col_idx)
            .map_err(|_| fault(format!("column index {col_idx} exceeds the sheet width")))?;
        worksheet
            .write_string(0, col, name)
            .map_err(|err| fault(err.to_string()))?;

        for (row_idx, value) in column.values().iter().enumerate() {
            let row = u32::try_from(row_idx + 1)
                .map_err(|_| fault(format!("row index {row_idx} exceeds the sheet height")))?;
            let written = match value {
                Scalar::Null(_) => continue,
                Scalar::Float64(v) if v.is_nan() => continue,
                Scalar::Float64(v) if v.is_infinite() => {
                    return Err(fault(format!(
                        "column {name:?} row {row_idx}: {v} has no spreadsheet encoding"
                    )));
                }
                Scalar::Float64(v) => worksheet.write_number(row, col, *v),
                Scalar::Int64(v) if v.unsigned_abs() > MAX_EXACT_SHEET_INT => {
                    return Err(fault(format!(
                        "column {name:?} row {row_idx}: {v} exceeds the exact integer range of a spreadsheet number"
                    )));
                }
                Scalar::Int64(v) => worksheet.write_number(row, col, *v as f64),
                Scalar::Bool(v) => worksheet.write_boolean(row, col, *v),
                Scalar::Utf8(v) => worksheet.write_string(row, col, v),
            };
            written.map_err(|err| fault(err.to_string()))?;
        }
    }

    let bytes = workbook
        .save_to_buffer()
        .map_err(|err| fault(err.to_string()))?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        rows = table.row_count(),
        bytes = bytes.len(),
        "spreadsheet serialized"
    );

    Ok(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub const ALL: [Self; 2] = [Self::Csv, Self::Xlsx];

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }

    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }

    pub fn serialize(self, table: &Table) -> Result<Vec<u8>, IoError> {
        match self {
            Self::Csv => write_csv_bytes(table),
            Self::Xlsx => write_xlsx_bytes(table),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// A downloadable export: suggested file name, format and encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

impl ExportArtifact {
    pub fn encode(stem: &str, format: ExportFormat, table: &Table) -> Result<Self, IoError> {
        Ok(Self {
            file_name: format!("{stem}.{}", format.extension()),
            format,
            bytes: format.serialize(table)?,
        })
    }

    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}
