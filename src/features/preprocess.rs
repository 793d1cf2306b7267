//! Cleaning transform that turns a merged client frame into a fully numeric
//! model matrix.
//!
//! The same transform runs for training and inference. In training mode the
//! target is moved to the last column and the written output becomes the
//! reference schema; in inference mode the output is aligned to that schema.

use super::encode::one_hot_columns;
use super::schema::ReferenceSchema;
use crate::config::{AggregateOp, AggregateRule, FeatureConfig, MissingReference};
use crate::frame::{Column, ColumnData, Frame};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Whether the transform prepares training data or scores new data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Inference,
}

/// Deterministic preprocessing driven by [`FeatureConfig`].
#[derive(Debug, Clone)]
pub struct Preprocessor {
    features: FeatureConfig,
    reference_path: PathBuf,
}

impl Preprocessor {
    /// `reference_path` is the cleaned training CSV whose header is the
    /// reference schema for inference.
    pub fn new(features: FeatureConfig, reference_path: impl Into<PathBuf>) -> Self {
        Self {
            features,
            reference_path: reference_path.into(),
        }
    }

    pub fn reference_path(&self) -> &Path {
        &self.reference_path
    }

    pub fn run(&self, frame: &Frame, mode: Mode) -> Result<Frame> {
        let mut df = frame.clone();
        let input_shape = df.shape();

        self.drop_unused(&mut df);
        self.fill_binary_flags(&mut df)?;
        self.map_geography(&mut df)?;
        self.aggregate_families(&mut df)?;
        let mut df = one_hot_columns(&df, &self.features.categorical_columns)?;
        df.fill_null_zero();
        self.coerce_text(&mut df)?;

        let df = match mode {
            Mode::Train => self.move_target_last(df)?,
            Mode::Inference => self.align_to_reference(df)?,
        };

        tracing::info!(
            "Preprocessed {:?} frame {:?} -> {:?}",
            mode,
            input_shape,
            df.shape()
        );
        Ok(df)
    }

    fn drop_unused(&self, df: &mut Frame) {
        df.drop_columns(&self.features.drop_columns);
    }

    fn fill_binary_flags(&self, df: &mut Frame) -> Result<()> {
        for flag in &self.features.binary_flags {
            if let Some(column) = df.column(flag) {
                let filled = column.to_filled_int(0);
                df.replace(filled)?;
            }
        }
        Ok(())
    }

    fn map_geography(&self, df: &mut Frame) -> Result<()> {
        let Some(column) = df.column(&self.features.geography_column) else {
            return Ok(());
        };
        let name = column.name.clone();
        let mapping = &self.features.geography_mapping;
        let values = (0..column.len())
            .map(|i| {
                let mapped = column
                    .label_at(i)
                    .and_then(|label| mapping.get(&label).copied());
                Some(mapped.unwrap_or(0))
            })
            .collect();
        df.replace(Column::int(name, values))
    }

    fn aggregate_families(&self, df: &mut Frame) -> Result<()> {
        // Families are resolved before any aggregate is appended
        let families: Vec<(&AggregateRule, Vec<String>)> = self
            .features
            .aggregates
            .iter()
            .map(|rule| {
                let members = df
                    .columns()
                    .iter()
                    .filter(|c| c.name.contains(&rule.pattern))
                    .map(|c| c.name.clone())
                    .collect();
                (rule, members)
            })
            .collect();

        for (rule, members) in families {
            let present: Vec<&Column> = members.iter().filter_map(|m| df.column(m)).collect();
            if present.is_empty() {
                continue;
            }
            let aggregate = aggregate_rows(&present, rule);
            df.drop_columns(&members);
            if df.contains(&rule.output) {
                anyhow::bail!("Aggregate column {} already exists", rule.output);
            }
            tracing::debug!(
                "Collapsed {} columns matching {} into {}",
                members.len(),
                rule.pattern,
                rule.output
            );
            df.push(aggregate)?;
        }
        Ok(())
    }

    fn coerce_text(&self, df: &mut Frame) -> Result<()> {
        let text: Vec<String> = df
            .columns()
            .iter()
            .filter(|c| !c.is_numeric())
            .map(|c| c.name.clone())
            .collect();

        for name in text {
            let converted = df.column(&name).and_then(Column::to_numeric);
            match converted {
                Some(column) => df.replace(column)?,
                None => {
                    tracing::warn!("Dropping non-numeric column {}", name);
                    df.remove(&name);
                }
            }
        }
        Ok(())
    }

    fn move_target_last(&self, mut df: Frame) -> Result<Frame> {
        let target = &self.features.target_column;
        match df.remove(target) {
            Some(column) => {
                df.push(column.to_filled_int(0))?;
            }
            None => tracing::warn!("Target column {} not found in training data", target),
        }
        Ok(df)
    }

    fn align_to_reference(&self, df: Frame) -> Result<Frame> {
        match ReferenceSchema::load_optional(&self.reference_path)? {
            Some(reference) => reference.align(&df),
            None => match self.features.missing_reference {
                MissingReference::Skip => {
                    tracing::warn!(
                        "Reference schema {} not found, skipping alignment",
                        self.reference_path.display()
                    );
                    Ok(df)
                }
                MissingReference::Fail => anyhow::bail!(
                    "Cannot align inference data: reference schema {} not found",
                    self.reference_path.display()
                ),
            },
        }
    }
}

/// Row-wise aggregate over a column family. Missing and unparseable cells
/// are skipped; a row with no values yields a missing mean and a zero sum.
fn aggregate_rows(columns: &[&Column], rule: &AggregateRule) -> Column {
    let height = columns.first().map_or(0, |c| c.len());
    let all_int = columns.iter().all(|c| matches!(c.data, ColumnData::Int(_)));

    let row_values = move |i: usize| columns.iter().filter_map(move |c| c.f64_at(i));

    match rule.op {
        AggregateOp::Sum if all_int => {
            let values = (0..height)
                .map(|i| Some(row_values(i).map(|x| x as i64).sum::<i64>()))
                .collect();
            Column::int(rule.output.clone(), values)
        }
        AggregateOp::Sum => {
            let values = (0..height).map(|i| Some(row_values(i).sum::<f64>())).collect();
            Column::float(rule.output.clone(), values)
        }
        AggregateOp::Mean => {
            let values = (0..height)
                .map(|i| {
                    let (sum, n) = row_values(i).fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
                    (n > 0).then(|| sum / n as f64)
                })
                .collect();
            Column::float(rule.output.clone(), values)
        }
    }
}
