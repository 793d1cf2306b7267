//! Merge raw sources and split the result into train and test files.

use crate::config::{Config, FeatureConfig};
use crate::features::merge_raw;
use crate::frame::{read_csv, write_csv, Frame};
use crate::split::train_test_split;
use anyhow::{Context, Result};
use std::path::Path;

/// Row counts produced by [`run_prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareStats {
    pub merged_rows: usize,
    pub merged_columns: usize,
    pub train_rows: usize,
    pub test_rows: usize,
}

impl std::fmt::Display for PrepareStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Merged: {} x {}, Train: {}, Test: {}",
            self.merged_rows, self.merged_columns, self.train_rows, self.test_rows
        )
    }
}

/// Read a clients/requests pair and merge it into one row per customer.
pub fn load_merged(clients_path: &Path, requests_path: &Path, features: &FeatureConfig) -> Result<Frame> {
    let clients = read_csv(clients_path)
        .with_context(|| format!("Failed to load clients from {}", clients_path.display()))?;
    let requests = read_csv(requests_path)
        .with_context(|| format!("Failed to load requests from {}", requests_path.display()))?;
    merge_raw(&clients, &requests, features)
}

/// Merge the training sources and write `merged.csv`, `train.csv` and
/// `test.csv` to the processed directory.
pub fn run_prepare(config: &Config) -> Result<PrepareStats> {
    tracing::info!(
        "Preparing data from {} and {}",
        config.input.clients_path.display(),
        config.input.requests_path.display()
    );
    let merged = load_merged(
        &config.input.clients_path,
        &config.input.requests_path,
        &config.features,
    )?;
    write_csv(&merged, config.output.merged_path())?;

    let (train, test) = train_test_split(&merged, config.training.test_size, config.training.seed)?;
    write_csv(&train, config.output.train_path())?;
    write_csv(&test, config.output.test_path())?;

    let stats = PrepareStats {
        merged_rows: merged.height(),
        merged_columns: merged.width(),
        train_rows: train.height(),
        test_rows: test.height(),
    };
    tracing::info!("Prepare complete: {}", stats);
    Ok(stats)
}
