//! Configuration for the attrition pipeline.

use crate::models::ModelKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Raw input locations
    #[serde(default)]
    pub input: InputConfig,

    /// Output locations
    #[serde(default)]
    pub output: OutputConfig,

    /// Feature engineering and alignment rules
    #[serde(default)]
    pub features: FeatureConfig,

    /// Model training
    #[serde(default)]
    pub training: TrainingConfig,

    /// Batch scoring and publishing
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Experiment tracking and model registry
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// Raw CSV inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Customer attributes used for training
    #[serde(default = "default_clients_path")]
    pub clients_path: PathBuf,

    /// Service requests used for training
    #[serde(default = "default_requests_path")]
    pub requests_path: PathBuf,

    /// Out-of-time customer attributes
    #[serde(default = "default_oot_clients_path")]
    pub oot_clients_path: PathBuf,

    /// Out-of-time service requests
    #[serde(default = "default_oot_requests_path")]
    pub oot_requests_path: PathBuf,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            clients_path: default_clients_path(),
            requests_path: default_requests_path(),
            oot_clients_path: default_oot_clients_path(),
            oot_requests_path: default_oot_requests_path(),
        }
    }
}

/// Output locations for intermediate matrices and published scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for merged, split and cleaned matrices
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,

    /// CSV with one row per scored customer (id, prob)
    #[serde(default = "default_predictions_csv")]
    pub predictions_csv: PathBuf,

    /// Local directory for the partitioned score table.
    /// Mutually exclusive with bucket/prefix.
    #[serde(default)]
    pub local_path: Option<String>,

    /// S3 bucket for the score table (required if local_path is not set)
    #[serde(default)]
    pub bucket: Option<String>,

    /// S3 prefix for the score table (required if local_path is not set)
    #[serde(default)]
    pub prefix: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            processed_dir: default_processed_dir(),
            predictions_csv: default_predictions_csv(),
            local_path: Some(default_scores_path()),
            bucket: None,
            prefix: None,
        }
    }
}

impl OutputConfig {
    /// Check if scores are published to the local filesystem.
    pub fn is_local(&self) -> bool {
        self.local_path.is_some()
    }

    /// Score table location as a display string (local path or s3:// URI).
    pub fn path_display(&self) -> String {
        if let Some(path) = &self.local_path {
            path.clone()
        } else {
            format!(
                "s3://{}/{}",
                self.bucket.as_deref().unwrap_or(""),
                self.prefix.as_deref().unwrap_or("")
            )
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn merged_path(&self) -> PathBuf {
        self.processed_dir.join("merged.csv")
    }

    pub fn train_path(&self) -> PathBuf {
        self.processed_dir.join("train.csv")
    }

    pub fn test_path(&self) -> PathBuf {
        self.processed_dir.join("test.csv")
    }

    /// Cleaned training matrix; its header is the reference schema.
    pub fn train_clean_path(&self) -> PathBuf {
        self.processed_dir.join("train_clean.csv")
    }

    pub fn test_clean_path(&self) -> PathBuf {
        self.processed_dir.join("test_clean.csv")
    }

    pub fn oot_clean_path(&self) -> PathBuf {
        self.processed_dir.join("oot").join("clean_oot_data.csv")
    }
}

/// What to do when the reference schema is missing at inference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingReference {
    /// Return the unaligned matrix and log a warning
    #[default]
    Skip,
    /// Fail the step
    Fail,
}

/// Row aggregation used to collapse a column family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Mean,
    Sum,
}

/// Collapse every column whose name contains `pattern` into `output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRule {
    pub pattern: String,
    pub output: String,
    pub op: AggregateOp,
}

/// Feature engineering and alignment rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Join key between clients and requests
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Monthly partition marker
    #[serde(default = "default_period_column")]
    pub period_column: String,

    /// Binary target
    #[serde(default = "default_target_column")]
    pub target_column: String,

    /// Columns removed before any other transformation
    #[serde(default = "default_drop_columns")]
    pub drop_columns: Vec<String>,

    /// Flags filled with 0 and cast to integer
    #[serde(default = "default_binary_flags")]
    pub binary_flags: Vec<String>,

    /// Geography column mapped to integers
    #[serde(default = "default_geography_column")]
    pub geography_column: String,

    /// Geography label mapping; anything else maps to 0
    #[serde(default = "default_geography_mapping")]
    pub geography_mapping: BTreeMap<String, i64>,

    /// Column families collapsed into one aggregate each
    #[serde(default = "default_aggregates")]
    pub aggregates: Vec<AggregateRule>,

    /// Categorical columns one-hot encoded during preprocessing
    #[serde(default = "default_categorical_columns")]
    pub categorical_columns: Vec<String>,

    /// Request categoricals one-hot encoded and summed per customer
    #[serde(default = "default_request_categoricals")]
    pub request_categoricals: Vec<String>,

    /// Behaviour when the reference schema file is absent at inference
    #[serde(default)]
    pub missing_reference: MissingReference,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            id_column: default_id_column(),
            period_column: default_period_column(),
            target_column: default_target_column(),
            drop_columns: default_drop_columns(),
            binary_flags: default_binary_flags(),
            geography_column: default_geography_column(),
            geography_mapping: default_geography_mapping(),
            aggregates: default_aggregates(),
            categorical_columns: default_categorical_columns(),
            request_categoricals: default_request_categoricals(),
            missing_reference: MissingReference::default(),
        }
    }
}

/// Model training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Fraction of merged rows held out as the test split
    #[serde(default = "default_test_size")]
    pub test_size: f64,

    /// Seed for the split and for stochastic models
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Models trained on every run
    #[serde(default = "default_models")]
    pub models: Vec<ModelKind>,

    /// Metric used to pick the best run
    #[serde(default = "default_selection_metric")]
    pub selection_metric: String,

    /// Rayon thread pool size for tree building (null = num CPUs)
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    #[serde(default)]
    pub logistic: LogisticParams,

    #[serde(default)]
    pub forest: ForestParams,

    #[serde(default)]
    pub boosting: BoostingParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: default_test_size(),
            seed: default_seed(),
            models: default_models(),
            selection_metric: default_selection_metric(),
            rayon_threads: None,
            logistic: LogisticParams::default(),
            forest: ForestParams::default(),
            boosting: BoostingParams::default(),
        }
    }
}

/// Logistic regression hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Inverse regularisation strength
    #[serde(default = "default_c")]
    pub c: f64,

    /// Stop when the largest gradient component falls below this
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            max_iter: default_max_iter(),
            learning_rate: default_learning_rate(),
            c: default_c(),
            tolerance: default_tolerance(),
        }
    }
}

/// Random forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    /// Maximum tree depth (null = grow until pure)
    #[serde(default)]
    pub max_depth: Option<usize>,

    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            max_depth: None,
            min_samples_split: default_min_samples_split(),
        }
    }
}

/// Gradient boosting hyperparameters, passed to the XGBoost tree booster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    #[serde(default = "default_boost_depth")]
    pub max_depth: usize,

    #[serde(default = "default_eta")]
    pub eta: f64,

    #[serde(default = "default_lambda")]
    pub lambda: f64,

    #[serde(default)]
    pub gamma: f64,

    #[serde(default = "default_min_child_weight")]
    pub min_child_weight: f64,

    #[serde(default = "default_subsample")]
    pub subsample: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            max_depth: default_boost_depth(),
            eta: default_eta(),
            lambda: default_lambda(),
            gamma: 0.0,
            min_child_weight: default_min_child_weight(),
            subsample: default_subsample(),
        }
    }
}

/// Batch scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Probability at or above which a customer is "High risk"
    #[serde(default = "default_high_risk")]
    pub high_risk_threshold: f64,

    /// Probability at or above which a customer is "Medium risk"
    #[serde(default = "default_medium_risk")]
    pub medium_risk_threshold: f64,

    /// Partition value; derived from the OOT period column when unset
    #[serde(default)]
    pub codmes: Option<i64>,

    /// Registered model to use; the best tracked run is used when unset
    #[serde(default)]
    pub model_name: Option<String>,

    /// Version of `model_name`; latest when unset
    #[serde(default)]
    pub model_version: Option<u32>,

    /// Query-engine table receiving the scores
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            high_risk_threshold: default_high_risk(),
            medium_risk_threshold: default_medium_risk(),
            codmes: None,
            model_name: None,
            model_version: None,
            table: default_table(),
        }
    }
}

/// Tracking and registry locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_tracking_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_experiment")]
    pub experiment: String,

    #[serde(default = "default_registry_dir")]
    pub registry_dir: PathBuf,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            dir: default_tracking_dir(),
            experiment: default_experiment(),
            registry_dir: default_registry_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        match (&self.output.local_path, &self.output.bucket, &self.output.prefix) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                anyhow::bail!("Cannot specify both local_path and bucket/prefix");
            }
            (None, None, _) | (None, _, None) => {
                anyhow::bail!("Must specify either local_path or both bucket and prefix");
            }
            _ => {}
        }

        if !(self.training.test_size > 0.0 && self.training.test_size < 1.0) {
            anyhow::bail!("test_size must be in (0, 1)");
        }
        if self.training.models.is_empty() {
            anyhow::bail!("At least one model must be configured");
        }
        if self.training.forest.n_estimators == 0 || self.training.boosting.n_estimators == 0 {
            anyhow::bail!("n_estimators must be > 0");
        }
        if !(self.training.boosting.subsample > 0.0 && self.training.boosting.subsample <= 1.0) {
            anyhow::bail!("subsample must be in (0, 1]");
        }
        if self.training.logistic.c <= 0.0 {
            anyhow::bail!("Logistic regression C must be > 0");
        }

        let s = &self.scoring;
        if !(0.0..=1.0).contains(&s.medium_risk_threshold)
            || !(0.0..=1.0).contains(&s.high_risk_threshold)
            || s.medium_risk_threshold > s.high_risk_threshold
        {
            anyhow::bail!(
                "Risk thresholds must satisfy 0 <= medium ({}) <= high ({}) <= 1",
                s.medium_risk_threshold,
                s.high_risk_threshold
            );
        }
        if s.model_version.is_some() && s.model_name.is_none() {
            anyhow::bail!("scoring.model_version requires scoring.model_name");
        }

        if self.features.id_column.is_empty() || self.features.target_column.is_empty() {
            anyhow::bail!("id_column and target_column must be set");
        }
        if let Some(rule) = self.features.aggregates.iter().find(|r| r.pattern.is_empty()) {
            anyhow::bail!("Aggregate rule for {} has an empty pattern", rule.output);
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_clients_path() -> PathBuf { "data/raw/train_clientes_sample.csv".into() }
fn default_requests_path() -> PathBuf { "data/raw/train_requerimientos_sample.csv".into() }
fn default_oot_clients_path() -> PathBuf { "data/raw/oot_clientes_sample.csv".into() }
fn default_oot_requests_path() -> PathBuf { "data/raw/oot_requerimientos_sample.csv".into() }
fn default_processed_dir() -> PathBuf { "data/processed".into() }
fn default_predictions_csv() -> PathBuf { "data/output/predictions.csv".into() }
fn default_scores_path() -> String { "data/output/scores".to_string() }
fn default_id_column() -> String { "ID_CORRELATIVO".to_string() }
fn default_period_column() -> String { "CODMES".to_string() }
fn default_target_column() -> String { "ATTRITION".to_string() }
fn default_geography_column() -> String { "FLAG_LIMA_PROVINCIA".to_string() }
fn default_test_size() -> f64 { 0.2 }
fn default_seed() -> u64 { 42 }
fn default_selection_metric() -> String { "roc_auc".to_string() }
fn default_max_iter() -> usize { 1000 }
fn default_learning_rate() -> f64 { 0.1 }
fn default_c() -> f64 { 1.0 }
fn default_tolerance() -> f64 { 1e-6 }
fn default_n_estimators() -> usize { 100 }
fn default_min_samples_split() -> usize { 2 }
fn default_boost_depth() -> usize { 6 }
fn default_eta() -> f64 { 0.3 }
fn default_lambda() -> f64 { 1.0 }
fn default_min_child_weight() -> f64 { 1.0 }
fn default_subsample() -> f64 { 1.0 }
fn default_high_risk() -> f64 { 0.415 }
fn default_medium_risk() -> f64 { 0.285 }
fn default_table() -> String { "mlops.bank_attrition_scores".to_string() }
fn default_tracking_dir() -> PathBuf { "mlruns".into() }
fn default_experiment() -> String { "bank-attrition".to_string() }
fn default_registry_dir() -> PathBuf { "registry".into() }

fn default_drop_columns() -> Vec<String> {
    vec!["ID_CORRELATIVO".to_string(), "CODMES".to_string()]
}

fn default_binary_flags() -> Vec<String> {
    ["FLG_BANCARIZADO", "FLG_SEGURO", "FLG_NOMINA", "FLG_SDO_OTSSFF"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_geography_mapping() -> BTreeMap<String, i64> {
    BTreeMap::from([("Lima".to_string(), 1), ("Provincia".to_string(), 0)])
}

fn default_aggregates() -> Vec<AggregateRule> {
    vec![
        AggregateRule {
            pattern: "SDO_ACTIVO".to_string(),
            output: "SDO_ACTIVO_PROM".to_string(),
            op: AggregateOp::Mean,
        },
        AggregateRule {
            pattern: "NRO_ACCES_CANAL".to_string(),
            output: "TOTAL_ACCESOS".to_string(),
            op: AggregateOp::Sum,
        },
        AggregateRule {
            pattern: "NRO_ENTID_SSFF".to_string(),
            output: "NRO_ENTID_SSFF_PROM".to_string(),
            op: AggregateOp::Mean,
        },
    ]
}

fn default_request_categoricals() -> Vec<String> {
    ["TIPO_REQUERIMIENTO2", "DICTAMEN", "PRODUCTO_SERVICIO_2", "SUBMOTIVO_2"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_categorical_columns() -> Vec<String> {
    [
        "RANG_INGRESO",
        "RANG_SDO_PASIVO_MENOS0",
        "RANG_NRO_PRODUCTOS_MENOS0",
        "TIPO_REQUERIMIENTO2",
        "DICTAMEN",
        "PRODUCTO_SERVICIO_2",
        "SUBMOTIVO_2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_models() -> Vec<ModelKind> {
    vec![
        ModelKind::LogisticRegression,
        ModelKind::RandomForest,
        ModelKind::GradientBoosting,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.features.target_column, "ATTRITION");
        assert_eq!(config.training.models.len(), 3);
        assert_eq!(
            config.output.train_clean_path(),
            PathBuf::from("data/processed/train_clean.csv")
        );
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = Config::from_yaml(
            r#"
output:
  bucket: scores-bucket
  prefix: attrition/scores
training:
  models: [random_forest]
  forest:
    n_estimators: 10
scoring:
  codmes: 202406
"#,
        )
        .unwrap();

        assert!(config.output.local_path.is_none());
        assert_eq!(config.output.path_display(), "s3://scores-bucket/attrition/scores");
        assert_eq!(config.training.models, vec![ModelKind::RandomForest]);
        assert_eq!(config.training.forest.n_estimators, 10);
        assert_eq!(config.training.forest.min_samples_split, 2);
        assert_eq!(config.scoring.codmes, Some(202406));
        assert_eq!(config.scoring.high_risk_threshold, 0.415);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_config() {
        let config =
            Config::from_json(r#"{"features": {"missing_reference": "fail"}}"#).unwrap();
        assert_eq!(config.features.missing_reference, MissingReference::Fail);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = config.to_yaml().unwrap();
        let back = Config::from_yaml(&yaml).unwrap();
        assert_eq!(back.features.aggregates, config.features.aggregates);
        assert_eq!(back.features.geography_mapping.get("Lima"), Some(&1));
    }

    #[test]
    fn test_config_validation_invalid() {
        let mut config = Config::default();
        config.output.bucket = Some("bucket".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scoring.medium_risk_threshold = 0.5;
        config.scoring.high_risk_threshold = 0.4;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.training.test_size = 1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.training.models.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scoring.model_version = Some(2);
        assert!(config.validate().is_err());
    }
}
