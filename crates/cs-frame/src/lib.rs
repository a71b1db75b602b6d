#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;

use cs_columnar::{Column, ColumnError, RowMask};
use cs_types::{DType, Scalar};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("column {name:?} has {column_len} rows but the table has {row_count}")]
    LengthMismatch {
        name: String,
        row_count: usize,
        column_len: usize,
    },
    #[error("duplicate column name {0:?}")]
    DuplicateColumn(String),
    #[error("row mask has {mask_len} entries but the table has {row_count} rows")]
    MaskLengthMismatch { mask_len: usize, row_count: usize },
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// SHA-256 digest of a table's schema and cells. Equal content, equal id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId([u8; 32]);

impl TableId {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Immutable table of uniquely named, equal-length columns in input order.
///
/// There is no way to mutate a `Table` in place; row subsets are new tables
/// with the same column set.
#[derive(Debug, Clone)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
    row_count: usize,
    positions: HashMap<String, usize>,
    id: TableId,
}

impl Table {
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self, FrameError> {
        let row_count = columns.first().map_or(0, |(_, column)| column.len());
        Self::with_row_count(row_count, columns)
    }

    /// Like [`Table::new`], but states the row count explicitly so that a
    /// table with no columns can still carry rows.
    pub fn with_row_count(
        row_count: usize,
        columns: Vec<(String, Column)>,
    ) -> Result<Self, FrameError> {
        let mut positions = HashMap::with_capacity(columns.len());
        let mut names = Vec::with_capacity(columns.len());
        let mut stored = Vec::with_capacity(columns.len());

        for (idx, (name, column)) in columns.into_iter().enumerate() {
            if column.len() != row_count {
                return Err(FrameError::LengthMismatch {
                    name,
                    row_count,
                    column_len: column.len(),
                });
            }
            if positions.insert(name.clone(), idx).is_some() {
                return Err(FrameError::DuplicateColumn(name));
            }
            names.push(name);
            stored.push(column);
        }

        let id = fingerprint(&names, &stored, row_count);
        Ok(Self {
            names,
            columns: stored,
            row_count,
            positions,
            id,
        })
    }

    pub fn from_scalars(columns: Vec<(&str, Vec<Scalar>)>) -> Result<Self, FrameError> {
        let columns = columns
            .into_iter()
            .map(|(name, values)| Ok((name.to_owned(), Column::from_values(values)?)))
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::new(columns)
    }

    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.positions
            .get(name)
            .and_then(|idx| self.columns.get(*idx))
    }

    #[must_use]
    pub fn dtype(&self, name: &str) -> Option<DType> {
        self.column(name).map(Column::dtype)
    }

    /// Columns paired with their names, in table order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter())
    }

    /// The view of this table restricted to rows where `mask` is true, in
    /// original row and column order.
    pub fn filter_rows(&self, mask: &RowMask) -> Result<Self, FrameError> {
        if mask.len() != self.row_count {
            return Err(FrameError::MaskLengthMismatch {
                mask_len: mask.len(),
                row_count: self.row_count,
            });
        }
        if mask.all_selected() {
            return Ok(self.clone());
        }
        self.take_rows(&mask.positions())
    }

    /// First `n` rows, for previews.
    pub fn head(&self, n: usize) -> Result<Self, FrameError> {
        let positions = (0..n.min(self.row_count)).collect::<Vec<_>>();
        self.take_rows(&positions)
    }

    fn take_rows(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let columns = self
            .columns()
            .map(|(name, column)| Ok((name.to_owned(), column.take(positions)?)))
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::with_row_count(positions.len(), columns)
    }

    /// Row `idx` as a vector of cells, in column order.
    #[must_use]
    pub fn row(&self, idx: usize) -> Option<Vec<&Scalar>> {
        if idx >= self.row_count {
            return None;
        }
        self.columns.iter().map(|column| column.value(idx)).collect()
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.row_count == other.row_count
            && self.names == other.names
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(left, right)| left.semantic_eq(right))
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.semantic_eq(other)
    }
}

fn fingerprint(names: &[String], columns: &[Column], row_count: usize) -> TableId {
    let mut hasher = Sha256::new();
    hasher.update((row_count as u64).to_le_bytes());
    hasher.update((names.len() as u64).to_le_bytes());
    for (name, column) in names.iter().zip(columns) {
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update([column.dtype() as u8]);
        for value in column.values() {
            hash_scalar(&mut hasher, value);
        }
    }

    let digest = hasher.finalize();
    let mut out = [0_u8; 32];
    out.copy_from_slice(&digest);
    TableId(out)
}

fn hash_scalar(hasher: &mut Sha256, value: &Scalar) {
    match value {
        Scalar::Null(_) => hasher.update([0_u8]),
        Scalar::Float64(v) if v.is_nan() => hasher.update([0_u8]),
        Scalar::Bool(v) => hasher.update([1_u8, u8::from(*v)]),
        Scalar::Int64(v) => {
            hasher.update([2_u8]);
            hasher.update(v.to_le_bytes());
        }
        Scalar::Float64(v) => {
            hasher.update([3_u8]);
            hasher.update(v.to_bits().to_le_bytes());
        }
        Scalar::Utf8(v) => {
            hasher.update([4_u8]);
            hasher.update((v.len() as u64).to_le_bytes());
            hasher.update(v.as_bytes());
        }
    }
}
