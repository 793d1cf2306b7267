//! Binary classifiers, their serialisable wrapper and evaluation metrics.
//!
//! All models implement [`Classifier`] over `ndarray` matrices. [`Model`]
//! wraps the concrete types so a fitted model can be stored in the registry
//! and loaded back without knowing its kind in advance.

mod boosting;
mod forest;
mod logistic;
pub mod metrics;
pub mod tree;

pub use boosting::GradientBoosting;
pub use forest::RandomForest;
pub use logistic::LogisticRegression;
pub use metrics::Evaluation;

use crate::config::TrainingConfig;
use anyhow::Result;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A binary classifier producing positive-class probabilities.
pub trait Classifier {
    /// Fit on a feature matrix and 0/1 labels.
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    /// Probability of the positive class for each row.
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Class labels using a 0.5 threshold.
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<i64>> {
        Ok(self.predict_proba(x)?.mapv(|p| i64::from(p >= 0.5)))
    }

    /// Hyperparameters as logged to the tracker.
    fn params(&self) -> BTreeMap<String, String>;
}

/// Supported model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    LogisticRegression,
    RandomForest,
    GradientBoosting,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::LogisticRegression => "logistic_regression",
            ModelKind::RandomForest => "random_forest",
            ModelKind::GradientBoosting => "gradient_boosting",
        }
    }

    /// Name under which trained models of this kind are registered.
    pub fn registered_name(&self) -> String {
        format!("{}_model", self.as_str())
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any supported model, fitted or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Model {
    LogisticRegression(LogisticRegression),
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
}

impl Model {
    /// Unfitted model of `kind` with hyperparameters from `config`.
    pub fn from_config(kind: ModelKind, config: &TrainingConfig) -> Self {
        match kind {
            ModelKind::LogisticRegression => {
                Model::LogisticRegression(LogisticRegression::new(config.logistic.clone()))
            }
            ModelKind::RandomForest => {
                Model::RandomForest(RandomForest::new(config.forest.clone(), config.seed))
            }
            ModelKind::GradientBoosting => {
                Model::GradientBoosting(GradientBoosting::new(config.boosting.clone(), config.seed))
            }
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Model::LogisticRegression(_) => ModelKind::LogisticRegression,
            Model::RandomForest(_) => ModelKind::RandomForest,
            Model::GradientBoosting(_) => ModelKind::GradientBoosting,
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            Model::LogisticRegression(m) => m,
            Model::RandomForest(m) => m,
            Model::GradientBoosting(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Model::LogisticRegression(m) => m,
            Model::RandomForest(m) => m,
            Model::GradientBoosting(m) => m,
        }
    }
}

impl Classifier for Model {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.inner_mut().fit(x, y)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.inner().predict_proba(x)
    }

    fn params(&self) -> BTreeMap<String, String> {
        self.inner().params()
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

pub(crate) fn check_fit_input(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() == 0 {
        anyhow::bail!("Cannot fit on an empty matrix");
    }
    if x.nrows() != y.len() {
        anyhow::bail!("Feature rows ({}) and labels ({}) differ", x.nrows(), y.len());
    }
    if let Some(bad) = y.iter().find(|&&v| v != 0.0 && v != 1.0) {
        anyhow::bail!("Labels must be 0 or 1, found {}", bad);
    }
    if x.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("Feature matrix contains non-finite values");
    }
    Ok(())
}

pub(crate) fn check_width(x: &Array2<f64>, expected: usize) -> Result<()> {
    if x.ncols() != expected {
        anyhow::bail!("Expected {} features, got {}", expected, x.ncols());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn quick_config() -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.forest.n_estimators = 5;
        config.boosting.n_estimators = 5;
        config.logistic.max_iter = 200;
        config
    }

    #[test]
    fn test_model_kind_names() {
        assert_eq!(ModelKind::RandomForest.to_string(), "random_forest");
        assert_eq!(
            ModelKind::GradientBoosting.registered_name(),
            "gradient_boosting_model"
        );
        let parsed: ModelKind = serde_yaml::from_str("logistic_regression").unwrap();
        assert_eq!(parsed, ModelKind::LogisticRegression);
    }

    #[test]
    fn test_every_kind_fits_and_roundtrips() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [7.0, 0.0], [8.0, 1.0], [9.0, 0.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let config = quick_config();

        for kind in [
            ModelKind::LogisticRegression,
            ModelKind::RandomForest,
            ModelKind::GradientBoosting,
        ] {
            let mut model = Model::from_config(kind, &config);
            assert_eq!(model.kind(), kind);
            model.fit(&x, &y).unwrap();

            let proba = model.predict_proba(&x).unwrap();
            assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)), "{kind}");

            let json = serde_json::to_string(&model).unwrap();
            let restored: Model = serde_json::from_str(&json).unwrap();
            let again = restored.predict_proba(&x).unwrap();
            for (a, b) in again.iter().zip(proba.iter()) {
                assert!((a - b).abs() < 1e-9, "{kind}");
            }
            assert!(!restored.params().is_empty());
        }
    }

    #[test]
    fn test_fit_input_validation() {
        let mut model = Model::from_config(ModelKind::LogisticRegression, &quick_config());
        assert!(model.fit(&array![[0.0], [1.0]], &array![0.0]).is_err());
        assert!(model.fit(&array![[0.0], [1.0]], &array![0.0, 2.0]).is_err());
        assert!(model.fit(&array![[f64::NAN], [1.0]], &array![0.0, 1.0]).is_err());
    }
}
