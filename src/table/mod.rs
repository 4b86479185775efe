//! In-memory catalog tables: ordered, named, typed columns with nullable cells.
//!
//! Column types are fixed when a table is loaded or built, so later stages
//! can ask for "a numeric column called X" once through [`Schema::require`]
//! instead of re-checking cells at every call site.

pub mod csv;
pub mod store;

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("column {column} has {found} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("column {column} has type {found}, expected one of {expected:?}")]
    TypeMismatch {
        column: String,
        expected: Vec<DataType>,
        found: DataType,
    },

    #[error("row {index} out of range for table with {rows} rows")]
    RowOutOfRange { index: usize, rows: usize },

    #[error("line {line}: expected {expected} fields, found {found}")]
    RaggedRow {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("unsupported table format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TableError>;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int,
    Float,
    Text,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Int | DataType::Float)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Text => "text",
        };
        f.write_str(name)
    }
}

/// A named, typed column description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub dtype: DataType,
}

/// Ordered column descriptions of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Look up `name` and check that its type is one of `accepted`.
    pub fn require(&self, name: &str, accepted: &[DataType]) -> Result<&Field> {
        let field = self
            .fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))?;
        if !accepted.contains(&field.dtype) {
            return Err(TableError::TypeMismatch {
                column: name.to_string(),
                expected: accepted.to_vec(),
                found: field.dtype,
            });
        }
        Ok(field)
    }
}

/// Cell storage for one column. `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DataType {
        match self {
            ColumnData::Int(_) => DataType::Int,
            ColumnData::Float(_) => DataType::Float,
            ColumnData::Text(_) => DataType::Text,
        }
    }

    /// An all-null column of `len` rows.
    pub fn nulls(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::Int => ColumnData::Int(vec![None; len]),
            DataType::Float => ColumnData::Float(vec![None; len]),
            DataType::Text => ColumnData::Text(vec![None; len]),
        }
    }

    pub fn get(&self, row: usize) -> Value<'_> {
        match self {
            ColumnData::Int(v) => v[row].map_or(Value::Null, Value::Int),
            ColumnData::Float(v) => v[row].map_or(Value::Null, Value::Float),
            ColumnData::Text(v) => v[row].as_deref().map_or(Value::Null, Value::Text),
        }
    }

    /// Gather rows by index; `None` produces a null cell.
    fn take(&self, rows: &[Option<usize>]) -> Self {
        fn gather<T: Clone>(v: &[Option<T>], rows: &[Option<usize>]) -> Vec<Option<T>> {
            rows.iter().map(|r| r.and_then(|i| v[i].clone())).collect()
        }
        match self {
            ColumnData::Int(v) => ColumnData::Int(gather(v, rows)),
            ColumnData::Float(v) => ColumnData::Float(gather(v, rows)),
            ColumnData::Text(v) => ColumnData::Text(gather(v, rows)),
        }
    }
}

/// A single cell, borrowed from its column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Null,
    Int(i64),
    Float(f64),
    Text(&'a str),
}

impl Value<'_> {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Int(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Hashable identity used for de-duplication and key joins.
    ///
    /// Integral floats compare equal to the matching integer, and all nulls
    /// compare equal to each other.
    pub fn key(&self) -> Key {
        match *self {
            Value::Null => Key::Null,
            Value::Int(i) => Key::Int(i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Key::Int(f as i64),
            Value::Float(f) => Key::Float(f.to_bits()),
            Value::Text(s) => Key::Text(s.to_string()),
        }
    }
}

/// Owned, hashable form of a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Null,
    Int(i64),
    Float(u64),
    Text(String),
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn int(name: impl Into<String>, values: Vec<Option<i64>>) -> Self {
        Self::new(name, ColumnData::Int(values))
    }

    /// Float column; NaN values are stored as missing.
    pub fn float(name: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        let values = values.into_iter().map(|v| (!v.is_nan()).then_some(v)).collect();
        Self::new(name, ColumnData::Float(values))
    }

    pub fn text<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = Option<S>>,
    ) -> Self {
        let values = values.into_iter().map(|v| v.map(Into::into)).collect();
        Self::new(name, ColumnData::Text(values))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    pub fn get(&self, row: usize) -> Value<'_> {
        self.data.get(row)
    }
}

/// An ordered collection of equal-length, uniquely named columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
    num_rows: usize,
}

impl Table {
    /// Build a table, checking that names are unique and lengths agree.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let num_rows = columns.first().map_or(0, Column::len);
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(TableError::DuplicateColumn(col.name.clone()));
            }
            if col.len() != num_rows {
                return Err(TableError::LengthMismatch {
                    column: col.name.clone(),
                    expected: num_rows,
                    found: col.len(),
                });
            }
        }
        Ok(Self { columns, num_rows })
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn schema(&self) -> Schema {
        Schema {
            fields: self
                .columns
                .iter()
                .map(|c| Field {
                    name: c.name.clone(),
                    dtype: c.dtype(),
                })
                .collect(),
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))
    }

    /// Append a column. An empty table adopts the column's length.
    pub fn push_column(&mut self, column: Column) -> Result<()> {
        if self.has_column(&column.name) {
            return Err(TableError::DuplicateColumn(column.name));
        }
        if self.columns.is_empty() {
            self.num_rows = column.len();
        } else if column.len() != self.num_rows {
            let found = column.len();
            return Err(TableError::LengthMismatch {
                column: column.name,
                expected: self.num_rows,
                found,
            });
        }
        self.columns.push(column);
        Ok(())
    }

    /// Replace the column of the same name in place, or append it if absent.
    pub fn set_column(&mut self, column: Column) -> Result<()> {
        let Some(pos) = self.columns.iter().position(|c| c.name == column.name) else {
            return self.push_column(column);
        };
        if column.len() != self.num_rows {
            let found = column.len();
            return Err(TableError::LengthMismatch {
                column: column.name,
                expected: self.num_rows,
                found,
            });
        }
        self.columns[pos] = column;
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<Column> {
        let pos = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))?;
        Ok(self.columns.remove(pos))
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if from != to && self.has_column(to) {
            return Err(TableError::DuplicateColumn(to.to_string()));
        }
        let col = self
            .columns
            .iter_mut()
            .find(|c| c.name == from)
            .ok_or_else(|| TableError::ColumnNotFound(from.to_string()))?;
        col.name = to.to_string();
        Ok(())
    }

    /// Append `suffix` to every column name (tags a catalog's columns with
    /// its survey before it is merged with others).
    pub fn with_suffix(mut self, suffix: &str) -> Self {
        for col in &mut self.columns {
            col.name.push_str(suffix);
        }
        self
    }

    /// First name among `base`, `base_1`, `base_2`, ... not already used.
    pub fn free_name(&self, base: &str) -> String {
        if !self.has_column(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|name| !self.has_column(name))
            .unwrap_or_else(|| base.to_string())
    }

    /// Gather rows by index. `None` entries produce an all-null row.
    pub fn take(&self, rows: &[Option<usize>]) -> Result<Self> {
        if let Some(&index) = rows.iter().flatten().find(|&&i| i >= self.num_rows) {
            return Err(TableError::RowOutOfRange {
                index,
                rows: self.num_rows,
            });
        }
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), c.data.take(rows)))
            .collect();
        Ok(Self {
            columns,
            num_rows: rows.len(),
        })
    }

    /// Keep the rows whose `mask` entry is true.
    pub fn filter(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.num_rows {
            return Err(TableError::LengthMismatch {
                column: "<mask>".to_string(),
                expected: self.num_rows,
                found: mask.len(),
            });
        }
        let rows: Vec<Option<usize>> = mask
            .iter()
            .enumerate()
            .filter(|(_, keep)| **keep)
            .map(|(i, _)| Some(i))
            .collect();
        self.take(&rows)
    }

    /// Numeric column as floats; missing cells become `None`.
    pub fn float_values(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let col = self.column(name)?;
        match &col.data {
            ColumnData::Float(v) => Ok(v.clone()),
            ColumnData::Int(v) => Ok(v.iter().map(|x| x.map(|i| i as f64)).collect()),
            ColumnData::Text(_) => Err(TableError::TypeMismatch {
                column: name.to_string(),
                expected: vec![DataType::Int, DataType::Float],
                found: DataType::Text,
            }),
        }
    }

    /// N x 2 array of (RA, Dec) in degrees; missing positions become NaN.
    pub fn positions(&self, ra: &str, dec: &str) -> Result<Array2<f64>> {
        let schema = self.schema();
        schema.require(ra, &[DataType::Float, DataType::Int])?;
        schema.require(dec, &[DataType::Float, DataType::Int])?;
        let ra = self.float_values(ra)?;
        let dec = self.float_values(dec)?;
        let mut out = Array2::zeros((self.num_rows, 2));
        for (mut row, (r, d)) in out.rows_mut().into_iter().zip(ra.into_iter().zip(dec)) {
            row[0] = r.unwrap_or(f64::NAN);
            row[1] = d.unwrap_or(f64::NAN);
        }
        Ok(out)
    }

    /// Side-by-side concatenation of two tables with equal row counts.
    ///
    /// Names present in both inputs get `suffixes.0` on the left copy and
    /// `suffixes.1` on the right copy; all other names are kept as is. A
    /// suffixed name that is already taken gets a further `_N`.
    pub fn hstack(left: Table, right: Table, suffixes: (&str, &str)) -> Result<Self> {
        if left.num_rows != right.num_rows {
            return Err(TableError::LengthMismatch {
                column: "<right table>".to_string(),
                expected: left.num_rows,
                found: right.num_rows,
            });
        }
        let num_rows = left.num_rows;
        let left_names: HashSet<String> = left.columns.iter().map(|c| c.name.clone()).collect();
        let right_names: HashSet<String> =
            right.columns.iter().map(|c| c.name.clone()).collect();
        let mut taken: HashSet<String> =
            left_names.symmetric_difference(&right_names).cloned().collect();

        let mut columns = Vec::with_capacity(left.columns.len() + right.columns.len());
        let sides = [
            (left.columns, &right_names, suffixes.0),
            (right.columns, &left_names, suffixes.1),
        ];
        for (side, other, suffix) in sides {
            for mut col in side {
                if other.contains(&col.name) {
                    let wanted = format!("{}{suffix}", col.name);
                    let name = free_suffixed(&taken, &wanted);
                    if name != wanted {
                        warn!(
                            column = %col.name,
                            renamed = %name,
                            "suffixed column name already taken"
                        );
                    }
                    col.name = name;
                }
                taken.insert(col.name.clone());
                columns.push(col);
            }
        }
        let mut table = Table::new(columns)?;
        if table.columns.is_empty() {
            table.num_rows = num_rows;
        }
        Ok(table)
    }
}

fn free_suffixed(taken: &HashSet<String>, wanted: &str) -> String {
    if !taken.contains(wanted) {
        return wanted.to_string();
    }
    (1..)
        .map(|n| format!("{wanted}_{n}"))
        .find(|name| !taken.contains(name))
        .unwrap_or_else(|| wanted.to_string())
}

/// Read a table, choosing the format by file extension.
pub fn read_table(path: &Path) -> Result<Table> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => csv::read_csv(path),
        Some(store::EXTENSION) => Ok(Table::load(path)?),
        _ => Err(TableError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Write a table, choosing the format by file extension.
pub fn write_table(table: &Table, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => csv::write_csv(table, path),
        Some(store::EXTENSION) => Ok(table.save(path)?),
        _ => Err(TableError::UnsupportedFormat(path.to_path_buf())),
    }
}
