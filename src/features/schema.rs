//! Reference schema captured from a training matrix, and alignment of
//! inference matrices to it.

use crate::frame::{read_csv_header, Column, Frame};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

/// Ordered column list of a previously produced training matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSchema {
    columns: Vec<String>,
}

/// Columns that differ between a frame and a reference schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    /// In the reference but not in the frame; zero-filled on alignment
    pub missing: Vec<String>,
    /// In the frame but not in the reference; dropped on alignment
    pub extra: Vec<String>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

impl ReferenceSchema {
    pub fn new(columns: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            anyhow::bail!("Duplicate column in reference schema: {}", dup);
        }
        Ok(Self { columns })
    }

    /// Capture the schema of a frame.
    pub fn of(frame: &Frame) -> Self {
        Self {
            columns: frame.column_names(),
        }
    }

    /// Read the schema from the header of a cleaned training CSV.
    pub fn from_csv_header(path: &Path) -> Result<Self> {
        let columns = read_csv_header(path)
            .with_context(|| format!("Failed to read reference schema from {}", path.display()))?;
        Self::new(columns)
    }

    /// Like [`ReferenceSchema::from_csv_header`], but `None` if the file is absent.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::from_csv_header(path).map(Some)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// The same schema with one column removed (e.g. the target).
    pub fn without(&self, name: &str) -> Self {
        Self {
            columns: self.columns.iter().filter(|c| *c != name).cloned().collect(),
        }
    }

    pub fn diff(&self, frame: &Frame) -> SchemaDiff {
        SchemaDiff {
            missing: self
                .columns
                .iter()
                .filter(|c| !frame.contains(c))
                .cloned()
                .collect(),
            extra: frame
                .columns()
                .iter()
                .map(|c| c.name.clone())
                .filter(|c| !self.contains(c))
                .collect(),
        }
    }

    /// Reshape `frame` to exactly this schema: zero-fill missing columns,
    /// drop extra columns and enforce the reference order.
    pub fn align(&self, frame: &Frame) -> Result<Frame> {
        let diff = self.diff(frame);
        if !diff.missing.is_empty() {
            tracing::info!(
                "Zero-filling {} columns absent from input: {:?}",
                diff.missing.len(),
                diff.missing
            );
        }
        if !diff.extra.is_empty() {
            tracing::info!(
                "Dropping {} columns unknown to the reference schema: {:?}",
                diff.extra.len(),
                diff.extra
            );
        }

        let height = frame.height();
        let columns = self
            .columns
            .iter()
            .map(|name| {
                frame
                    .column(name)
                    .cloned()
                    .unwrap_or_else(|| Column::zeros(name.clone(), height))
            })
            .collect();
        Frame::with_height(columns, height)
    }
}
