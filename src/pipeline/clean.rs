//! Clean the train and test splits into model matrices.

use crate::config::Config;
use crate::features::{Mode, Preprocessor};
use crate::frame::{read_csv, write_csv};
use crate::tracking::{InputRecord, Tracker};
use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessStats {
    pub train_rows: usize,
    pub test_rows: usize,
    /// Width of the reference schema, target included
    pub columns: usize,
}

impl std::fmt::Display for PreprocessStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Train: {} rows, Test: {} rows, Columns: {}",
            self.train_rows, self.test_rows, self.columns
        )
    }
}

/// Preprocess `train.csv` in training mode, then `test.csv` in inference
/// mode against the freshly written `train_clean.csv`.
pub fn run_preprocess(config: &Config, tracker: &Tracker) -> Result<PreprocessStats> {
    let output = &config.output;
    let preprocessor = Preprocessor::new(config.features.clone(), output.train_clean_path());
    let mut run = tracker.start_run("preprocessing")?;

    let train_path = output.train_path();
    let train = read_csv(&train_path)?;
    run.log_input(InputRecord::from_frame("training", &train_path, &train))?;
    let train_clean = preprocessor.run(&train, Mode::Train)?;
    write_csv(&train_clean, output.train_clean_path())?;

    let test_path = output.test_path();
    let test = read_csv(&test_path)?;
    run.log_input(InputRecord::from_frame("test", &test_path, &test))?;
    let test_clean = preprocessor.run(&test, Mode::Inference)?;
    write_csv(&test_clean, output.test_clean_path())?;

    let stats = PreprocessStats {
        train_rows: train_clean.height(),
        test_rows: test_clean.height(),
        columns: train_clean.width(),
    };
    run.log_param("reference_schema", output.train_clean_path().display())?;
    run.log_metric("train_rows", stats.train_rows as f64)?;
    run.log_metric("test_rows", stats.test_rows as f64)?;
    run.log_metric("columns", stats.columns as f64)?;
    run.finish()?;

    tracing::info!("Preprocess complete: {}", stats);
    Ok(stats)
}
