//! Bank Attrition Pipeline
//!
//! Batch pipeline that predicts customer attrition for a retail bank: it
//! merges customer attributes with service-request logs, cleans them into a
//! fixed model matrix, trains and registers classifiers, and publishes
//! risk-bucketed scores for out-of-time data as a partitioned Parquet table.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **Frame**: Typed columnar table with CSV, Arrow and Parquet conversion
//! - **Features**: Request aggregation, preprocessing and reference-schema alignment
//! - **Models**: Logistic regression and random forest on ndarray, gradient boosting on XGBoost
//! - **Tracking / Registry**: File-backed experiment runs and versioned models
//! - **Scoring**: Risk buckets, ranking and publication through object_store
//! - **Pipeline**: The prepare, preprocess, train and score steps
//!
//! # Usage
//!
//! ```no_run
//! use bank_attrition::{Config, run_pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     run_pipeline(config).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod features;
pub mod frame;
pub mod io;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod scoring;
pub mod split;
pub mod tracking;

pub use config::{Config, FeatureConfig, MissingReference};
pub use features::{Mode, Preprocessor, ReferenceSchema};
pub use frame::{Column, ColumnData, Frame};
pub use models::{Classifier, Evaluation, Model, ModelKind};
pub use pipeline::{
    run_prepare, run_preprocess, run_score, run_train, PipelineStats, PrepareStats,
    PreprocessStats, ScoreStats, TrainStats,
};
pub use registry::{ModelArtifact, Registry, RegistryError};
pub use tracking::{RunStatus, Tracker};

use anyhow::Result;
use std::time::Instant;

/// Run every step in order: prepare, preprocess, train and score.
pub async fn run_pipeline(config: Config) -> Result<PipelineStats> {
    config.validate()?;
    let start = Instant::now();

    tracing::info!("Starting Bank Attrition Pipeline");
    let tracker = Tracker::from_config(&config.tracking)?;
    let registry = Registry::new(&config.tracking.registry_dir);
    tracing::info!(
        "Tracking experiment {} in {}, registry at {}",
        tracker.experiment(),
        config.tracking.dir.display(),
        registry.root().display()
    );

    let prepare = run_prepare(&config)?;
    let preprocess = run_preprocess(&config, &tracker)?;
    let train = run_train(&config, &tracker, &registry)?;
    let score = run_score(&config, &tracker, &registry).await?;

    let stats = PipelineStats {
        prepare,
        preprocess,
        train,
        score,
        elapsed: start.elapsed(),
    };
    tracing::info!("Pipeline complete in {:.1}s", stats.elapsed.as_secs_f64());
    Ok(stats)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

/// Initialize the Rayon thread pool.
pub fn init_rayon(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}
