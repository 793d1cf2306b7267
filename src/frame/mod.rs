//! Column-oriented in-memory table used by every pipeline step.
//!
//! A [`Frame`] is an ordered set of uniquely named [`Column`]s of equal
//! length. Operations keep column order unless documented otherwise.

mod columnar;
mod csv_io;

pub use columnar::{cast_columns, to_record_batch, write_parquet_bytes};
pub use csv_io::{read_csv, read_csv_header, write_csv};

use anyhow::{Context, Result};
use ndarray::Array2;
use std::collections::HashSet;

/// Typed storage for a single column. `None` is a missing value.
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

    fn take(&self, indices: &[usize]) -> Self {
        match self {
            ColumnData::Int(v) => ColumnData::Int(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Float(v) => ColumnData::Float(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Text(v) => {
                ColumnData::Text(indices.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }

    /// Pick rows by optional index; `None` yields a missing value.
    pub fn gather(&self, picks: &[Option<usize>]) -> Self {
        match self {
            ColumnData::Int(v) => ColumnData::Int(picks.iter().map(|p| p.and_then(|i| v[i])).collect()),
            ColumnData::Float(v) => {
                ColumnData::Float(picks.iter().map(|p| p.and_then(|i| v[i])).collect())
            }
            ColumnData::Text(v) => {
                ColumnData::Text(picks.iter().map(|p| p.and_then(|i| v[i].clone())).collect())
            }
        }
    }
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

    pub fn float(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self::new(name, ColumnData::Float(values))
    }

    pub fn text<S: Into<String>>(name: impl Into<String>, values: Vec<Option<S>>) -> Self {
        Self::new(
            name,
            ColumnData::Text(values.into_iter().map(|v| v.map(Into::into)).collect()),
        )
    }

    /// An all-zero integer column.
    pub fn zeros(name: impl Into<String>, len: usize) -> Self {
        Self::int(name, vec![Some(0); len])
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self.data, ColumnData::Text(_))
    }

    pub fn null_count(&self) -> usize {
        match &self.data {
            ColumnData::Int(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Float(v) => v.iter().filter(|x| x.map_or(true, f64::is_nan)).count(),
            ColumnData::Text(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    /// Numeric view of row `i`. Text cells are parsed; NaN reads as missing.
    pub fn f64_at(&self, i: usize) -> Option<f64> {
        match &self.data {
            ColumnData::Int(v) => v[i].map(|x| x as f64),
            ColumnData::Float(v) => v[i].filter(|x| !x.is_nan()),
            ColumnData::Text(v) => v[i]
                .as_deref()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|x| !x.is_nan()),
        }
    }

    /// String rendering of row `i` as used for category labels.
    pub fn label_at(&self, i: usize) -> Option<String> {
        match &self.data {
            ColumnData::Int(v) => v[i].map(|x| x.to_string()),
            ColumnData::Float(v) => v[i].filter(|x| !x.is_nan()).map(format_float),
            ColumnData::Text(v) => v[i].clone(),
        }
    }

    /// Numeric copy of the column. Returns `None` if a non-empty text cell
    /// does not parse.
    pub fn to_numeric(&self) -> Option<Column> {
        match &self.data {
            ColumnData::Int(_) | ColumnData::Float(_) => Some(self.clone()),
            ColumnData::Text(values) => {
                let mut out = Vec::with_capacity(values.len());
                for value in values {
                    match value.as_deref().map(str::trim) {
                        None | Some("") => out.push(None),
                        Some(s) => out.push(Some(s.parse::<f64>().ok()?)),
                    }
                }
                Some(Column::float(self.name.clone(), out))
            }
        }
    }

    /// Integer copy of the column with missing values replaced by `fill`.
    /// Floats are truncated toward zero; unparseable text becomes `fill`.
    pub fn to_filled_int(&self, fill: i64) -> Column {
        let values = (0..self.len())
            .map(|i| Some(self.f64_at(i).map_or(fill, |x| x as i64)))
            .collect();
        Column::int(self.name.clone(), values)
    }

    /// Replace missing values with zero (`"0"` for text columns).
    pub fn fill_null_zero(&mut self) {
        match &mut self.data {
            ColumnData::Int(v) => v.iter_mut().for_each(|x| {
                x.get_or_insert(0);
            }),
            ColumnData::Float(v) => v.iter_mut().for_each(|x| {
                if x.map_or(true, f64::is_nan) {
                    *x = Some(0.0);
                }
            }),
            ColumnData::Text(v) => v.iter_mut().for_each(|x| {
                x.get_or_insert_with(|| "0".to_string());
            }),
        }
    }
}

/// Format a float the way it round-trips through CSV (`1.0`, `0.25`).
pub fn format_float(x: f64) -> String {
    format!("{:?}", x)
}

/// Ordered collection of equal-length columns.
///
/// The row count is stored with the frame so dropping every column keeps it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<Column>,
    height: usize,
}

impl Frame {
    /// Build a frame, checking that names are unique and lengths agree.
    /// The height is taken from the first column, 0 when there are none.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let height = columns.first().map_or(0, Column::len);
        Self::with_height(columns, height)
    }

    /// Build a frame of `height` rows; every column must have that length.
    pub fn with_height(columns: Vec<Column>, height: usize) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                anyhow::bail!("Duplicate column name: {}", column.name);
            }
        }
        if let Some(bad) = columns.iter().find(|c| c.len() != height) {
            anyhow::bail!(
                "Column {} has {} rows, expected {}",
                bad.name,
                bad.len(),
                height
            );
        }
        Ok(Self { columns, height })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column, failing with its name in the error.
    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .with_context(|| format!("Column not found: {}", name))
    }

    /// Append a column at the end. The first column pushed onto an empty
    /// zero-row frame sets its height.
    pub fn push(&mut self, column: Column) -> Result<()> {
        if self.contains(&column.name) {
            anyhow::bail!("Duplicate column name: {}", column.name);
        }
        if self.columns.is_empty() && self.height == 0 {
            self.height = column.len();
        } else if column.len() != self.height {
            anyhow::bail!(
                "Column {} has {} rows, expected {}",
                column.name,
                column.len(),
                self.height()
            );
        }
        self.columns.push(column);
        Ok(())
    }

    /// Replace a column in place, keeping its position.
    pub fn replace(&mut self, column: Column) -> Result<()> {
        let idx = self
            .position(&column.name)
            .with_context(|| format!("Column not found: {}", column.name))?;
        if column.len() != self.height() {
            anyhow::bail!("Replacement for {} has wrong length", column.name);
        }
        self.columns[idx] = column;
        Ok(())
    }

    /// Remove a column and return it.
    pub fn remove(&mut self, name: &str) -> Option<Column> {
        let idx = self.position(name)?;
        Some(self.columns.remove(idx))
    }

    /// Drop every named column that exists; unknown names are ignored.
    pub fn drop_columns<S: AsRef<str>>(&mut self, names: &[S]) {
        self.columns
            .retain(|c| !names.iter().any(|n| n.as_ref() == c.name));
    }

    /// New frame with exactly the named columns, in the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Frame> {
        let columns = names
            .iter()
            .map(|n| self.require(n.as_ref()).cloned())
            .collect::<Result<Vec<_>>>()?;
        Frame::with_height(columns, self.height)
    }

    /// New frame with the given rows, in the given order.
    pub fn take(&self, indices: &[usize]) -> Frame {
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), c.data.take(indices)))
            .collect();
        Frame {
            columns,
            height: indices.len(),
        }
    }

    /// Replace every missing value with zero.
    pub fn fill_null_zero(&mut self) {
        for column in &mut self.columns {
            column.fill_null_zero();
        }
    }

    /// Row-major `f64` matrix over the named columns. Missing values and
    /// unparseable text are rejected.
    pub fn to_array<S: AsRef<str>>(&self, names: &[S]) -> Result<Array2<f64>> {
        let cols = names
            .iter()
            .map(|n| self.require(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let height = self.height();
        let mut out = Array2::<f64>::zeros((height, cols.len()));
        for (j, col) in cols.iter().enumerate() {
            for i in 0..height {
                out[[i, j]] = col.f64_at(i).with_context(|| {
                    format!("Non-numeric or missing value in column {} at row {}", col.name, i)
                })?;
            }
        }
        Ok(out)
    }
}
