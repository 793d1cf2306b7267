//! Bank Attrition Pipeline CLI
//!
//! Prepares data, trains churn models and publishes batch scores.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bank_attrition::{
    build_runtime, init_rayon, run_pipeline, run_prepare, run_preprocess, run_score, run_train,
    Config, Registry, Tracker,
};

#[derive(Parser)]
#[command(name = "attrition")]
#[command(about = "Train churn models and publish batch attrition scores", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every step (default if no command specified)
    Run,

    /// Merge raw sources and split into train/test
    Prepare,

    /// Clean the train/test splits into model matrices
    Preprocess,

    /// Train, evaluate and register the configured models
    Train,

    /// Score out-of-time data and publish the partition
    Score {
        /// Partition value (defaults to the latest CODMES in the OOT data)
        #[arg(long)]
        codmes: Option<i64>,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => run_command(cli.config)?,
        Some(Commands::Prepare) => prepare_command(cli.config)?,
        Some(Commands::Preprocess) => preprocess_command(cli.config)?,
        Some(Commands::Train) => train_command(cli.config)?,
        Some(Commands::Score { codmes }) => score_command(cli.config, codmes)?,
        Some(Commands::Validate) => validate_command(cli.config)?,
        Some(Commands::GenerateConfig { output }) => generate_config_command(output)?,
    }

    Ok(())
}

fn load_config(config_path: &Path) -> Result<Config> {
    let config = Config::from_file(config_path)?;
    config.validate()?;
    Ok(config)
}

fn run_command(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    init_rayon(config.training.rayon_threads)?;

    let runtime = build_runtime(None)?;
    let stats = runtime.block_on(async { run_pipeline(config).await })?;
    println!("\n=== Pipeline Summary ===\n{}", stats);
    Ok(())
}

fn prepare_command(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let stats = run_prepare(&config)?;
    println!("{}", stats);
    Ok(())
}

fn preprocess_command(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let tracker = Tracker::from_config(&config.tracking)?;
    let stats = run_preprocess(&config, &tracker)?;
    println!("{}", stats);
    Ok(())
}

fn train_command(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    init_rayon(config.training.rayon_threads)?;

    let tracker = Tracker::from_config(&config.tracking)?;
    let registry = Registry::new(&config.tracking.registry_dir);
    let stats = run_train(&config, &tracker, &registry)?;
    for model in &stats.models {
        println!("{}", model);
    }
    Ok(())
}

fn score_command(config_path: PathBuf, codmes: Option<i64>) -> Result<()> {
    let mut config = load_config(&config_path)?;
    if codmes.is_some() {
        config.scoring.codmes = codmes;
    }

    let tracker = Tracker::from_config(&config.tracking)?;
    let registry = Registry::new(&config.tracking.registry_dir);
    let runtime = build_runtime(None)?;
    let stats = runtime.block_on(run_score(&config, &tracker, &registry))?;
    println!("{}", stats);
    println!("Published: {}", stats.published.scores);
    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Bank Attrition Pipeline Configuration

# === INPUT: Raw CSV extracts ===
input:
  # Customer attributes and service requests used for training
  clients_path: "data/raw/train_clientes_sample.csv"
  requests_path: "data/raw/train_requerimientos_sample.csv"

  # Out-of-time extracts scored by the batch step
  oot_clients_path: "data/raw/oot_clientes_sample.csv"
  oot_requests_path: "data/raw/oot_requerimientos_sample.csv"

# === OUTPUT: Intermediate matrices and published scores ===
# Choose ONE of: local_path (local disk) OR bucket+prefix (S3)
output:
  # merged.csv, train/test splits and cleaned matrices
  processed_dir: "data/processed"

  # One row per scored customer (id, prob)
  predictions_csv: "data/output/predictions.csv"

  # Option 1: Publish the score table to the local filesystem
  local_path: "data/output/scores"

  # Option 2: Publish to S3 (comment out local_path and uncomment these)
  # bucket: "ml-bucket"
  # prefix: "scores/bank-attrition"

# === FEATURES: Cleaning and alignment rules ===
features:
  id_column: "ID_CORRELATIVO"
  period_column: "CODMES"
  target_column: "ATTRITION"

  # Dropped before anything else
  drop_columns: ["ID_CORRELATIVO", "CODMES"]

  # Filled with 0 and cast to integer
  binary_flags: ["FLG_BANCARIZADO", "FLG_SEGURO", "FLG_NOMINA", "FLG_SDO_OTSSFF"]

  # Unmapped labels become 0
  geography_column: "FLAG_LIMA_PROVINCIA"
  geography_mapping:
    Lima: 1
    Provincia: 0

  # Every column containing `pattern` collapses into `output`
  aggregates:
    - { pattern: "SDO_ACTIVO", output: "SDO_ACTIVO_PROM", op: mean }
    - { pattern: "NRO_ACCES_CANAL", output: "TOTAL_ACCESOS", op: sum }
    - { pattern: "NRO_ENTID_SSFF", output: "NRO_ENTID_SSFF_PROM", op: mean }

  categorical_columns:
    - RANG_INGRESO
    - RANG_SDO_PASIVO_MENOS0
    - RANG_NRO_PRODUCTOS_MENOS0
    - TIPO_REQUERIMIENTO2
    - DICTAMEN
    - PRODUCTO_SERVICIO_2
    - SUBMOTIVO_2

  # One-hot encoded and summed per customer before the merge
  request_categoricals: ["TIPO_REQUERIMIENTO2", "DICTAMEN", "PRODUCTO_SERVICIO_2", "SUBMOTIVO_2"]

  # skip: score unaligned data with a warning; fail: stop the step
  missing_reference: skip

# === TRAINING ===
training:
  test_size: 0.2
  seed: 42
  models: [logistic_regression, random_forest, gradient_boosting]

  # Metric used to pick the model for scoring
  selection_metric: "roc_auc"

  # Rayon thread pool size for tree building (null = num CPUs)
  # rayon_threads: 8

  logistic:
    max_iter: 1000
    learning_rate: 0.1
    c: 1.0

  forest:
    n_estimators: 100
    # max_depth: 12
    min_samples_split: 2

  boosting:
    n_estimators: 100
    max_depth: 6
    eta: 0.3
    lambda: 1.0
    gamma: 0.0
    min_child_weight: 1.0
    subsample: 1.0

# === SCORING ===
scoring:
  high_risk_threshold: 0.415
  medium_risk_threshold: 0.285

  # Partition value (null = latest CODMES in the OOT clients)
  # codmes: 201910

  # Pin a registered model instead of the best tracked run
  # model_name: "gradient_boosting_model"
  # model_version: 1

  table: "mlops.bank_attrition_scores"

# === TRACKING: Experiment runs and model registry ===
tracking:
  dir: "mlruns"
  experiment: "bank-attrition"
  registry_dir: "registry"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
