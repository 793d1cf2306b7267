//! Pipeline steps: prepare, preprocess, train and score.
//!
//! ```text
//! ┌─────────┐     ┌────────────┐     ┌─────────┐     ┌─────────┐
//! │ Prepare │────▶│ Preprocess │────▶│  Train  │────▶│  Score  │
//! └─────────┘     └────────────┘     └─────────┘     └─────────┘
//!      │                │                 │               │
//!  merged.csv     train_clean.csv     registry       codmes=N/
//!  train/test     test_clean.csv      + runs         output.parquet
//! ```
//!
//! Steps share no in-memory state and communicate through files, so each
//! can be run on its own from the CLI.

mod clean;
mod prepare;
mod score;
mod train;

#[cfg(test)]
mod integration_tests;

pub use clean::{run_preprocess, PreprocessStats};
pub use prepare::{load_merged, run_prepare, PrepareStats};
pub use score::{run_score, select_model, ScoreStats, SelectedModel};
pub use train::{run_train, TrainStats, TrainedModel};

use crate::config::Config;
use crate::features::{Mode, Preprocessor};
use crate::frame::Frame;
use anyhow::{Context, Result};
use std::time::Duration;

/// Summary of a full pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub prepare: PrepareStats,
    pub preprocess: PreprocessStats,
    pub train: TrainStats,
    pub score: ScoreStats,
    pub elapsed: Duration,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Prepare    | {}", self.prepare)?;
        writeln!(f, "Preprocess | {}", self.preprocess)?;
        writeln!(f, "Train      | {}", self.train)?;
        writeln!(f, "Score      | {}", self.score)?;
        write!(f, "Elapsed    | {:.1}s", self.elapsed.as_secs_f64())
    }
}

/// 0/1 labels from the `target` column of `frame`.
pub(crate) fn labels(frame: &Frame, target: &str) -> Result<Vec<i64>> {
    let column = frame.require(target)?;
    (0..column.len())
        .map(|i| match column.f64_at(i) {
            Some(v) if v == 0.0 || v == 1.0 => Ok(v as i64),
            Some(v) => anyhow::bail!("Target {} has non-binary value {} at row {}", target, v, i),
            None => anyhow::bail!("Target {} is missing at row {}", target, i),
        })
        .collect()
}

/// Merged and cleaned out-of-time data.
pub(crate) struct OotData {
    /// Merged frame before preprocessing; carries ids and the period column
    pub raw: Frame,
    /// Preprocessed frame aligned to the reference schema
    pub clean: Frame,
    /// Labels taken from the raw frame, when it has a target column
    pub labels: Option<Vec<i64>>,
}

/// Merge and preprocess the OOT inputs. `None` if either file is absent.
pub(crate) fn load_oot(config: &Config) -> Result<Option<OotData>> {
    let input = &config.input;
    if !input.oot_clients_path.is_file() || !input.oot_requests_path.is_file() {
        tracing::info!(
            "No OOT data at {} / {}",
            input.oot_clients_path.display(),
            input.oot_requests_path.display()
        );
        return Ok(None);
    }

    let raw = load_merged(&input.oot_clients_path, &input.oot_requests_path, &config.features)?;
    let target = &config.features.target_column;
    let y = if raw.contains(target) {
        Some(labels(&raw, target).context("Invalid OOT target")?)
    } else {
        None
    };

    let preprocessor = Preprocessor::new(config.features.clone(), config.output.train_clean_path());
    let clean = preprocessor.run(&raw, Mode::Inference)?;
    Ok(Some(OotData {
        raw,
        clean,
        labels: y,
    }))
}
