use super::{check_fit_input, check_width, Classifier};
use crate::config::BoostingParams;
use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xgboost::{parameters, Booster, DMatrix};

/// XGBoost gradient boosted trees with a `binary:logistic` objective.
///
/// The fitted booster is kept as its serialised model bytes so the
/// classifier stays `Clone`, `Send` and serde friendly. A [`Booster`] is
/// loaded from those bytes for each prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    params: BoostingParams,
    seed: u64,
    n_features: usize,
    #[serde(default)]
    booster: Vec<u8>,
}

impl GradientBoosting {
    pub fn new(params: BoostingParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            n_features: 0,
            booster: Vec::new(),
        }
    }

    /// Serialised booster, empty until fitted.
    pub fn booster_bytes(&self) -> &[u8] {
        &self.booster
    }

    fn booster_params(&self) -> Result<parameters::BoosterParameters> {
        let p = &self.params;
        let tree_params = parameters::tree::TreeBoosterParametersBuilder::default()
            .eta(p.eta as f32)
            .gamma(p.gamma as f32)
            .max_depth(u32::try_from(p.max_depth).context("max_depth out of range")?)
            .min_child_weight(p.min_child_weight as f32)
            .subsample(p.subsample as f32)
            .lambda(p.lambda as f32)
            .build()
            .map_err(anyhow::Error::msg)?;

        let learning_params = parameters::learning::LearningTaskParametersBuilder::default()
            .objective(parameters::learning::Objective::BinaryLogistic)
            .seed(self.seed)
            .build()
            .map_err(anyhow::Error::msg)?;

        parameters::BoosterParametersBuilder::default()
            .booster_type(parameters::BoosterType::Tree(tree_params))
            .learning_params(learning_params)
            .verbose(false)
            .build()
            .map_err(anyhow::Error::msg)
    }
}

/// Row-major `f32` matrix as XGBoost expects it.
fn to_dmatrix(x: &Array2<f64>) -> Result<DMatrix> {
    let data: Vec<f32> = x.iter().map(|&v| v as f32).collect();
    Ok(DMatrix::from_dense(&data, x.nrows())?)
}

impl Classifier for GradientBoosting {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_fit_input(x, y)?;
        let params = &self.params;
        if params.n_estimators == 0 {
            anyhow::bail!("n_estimators must be > 0");
        }
        if !(params.subsample > 0.0 && params.subsample <= 1.0) {
            anyhow::bail!("subsample must be in (0, 1], got {}", params.subsample);
        }
        let rounds = u32::try_from(params.n_estimators).context("n_estimators out of range")?;

        let mut dtrain = to_dmatrix(x)?;
        let labels: Vec<f32> = y.iter().map(|&v| v as f32).collect();
        dtrain.set_labels(&labels)?;

        let training_params = parameters::TrainingParametersBuilder::default()
            .dtrain(&dtrain)
            .boost_rounds(rounds)
            .booster_params(self.booster_params()?)
            .evaluation_sets(None)
            .build()
            .map_err(anyhow::Error::msg)?;
        let booster = Booster::train(&training_params)?;

        let file = tempfile::NamedTempFile::new().context("Failed to create booster file")?;
        booster.save(file.path())?;
        let bytes = std::fs::read(file.path())
            .with_context(|| format!("Failed to read booster from {}", file.path().display()))?;

        tracing::debug!(
            "Gradient boosting: {} rounds, {} byte model",
            rounds,
            bytes.len()
        );
        self.n_features = x.ncols();
        self.booster = bytes;
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.booster.is_empty() {
            anyhow::bail!("Gradient boosting model is not fitted");
        }
        check_width(x, self.n_features)?;
        if x.nrows() == 0 {
            return Ok(Array1::zeros(0));
        }
        let booster = Booster::load_buffer(&self.booster)?;
        let preds = booster.predict(&to_dmatrix(x)?)?;
        if preds.len() != x.nrows() {
            anyhow::bail!("Booster returned {} predictions for {} rows", preds.len(), x.nrows());
        }
        Ok(preds.into_iter().map(f64::from).collect())
    }

    fn params(&self) -> BTreeMap<String, String> {
        let p = &self.params;
        BTreeMap::from([
            ("n_estimators".to_string(), p.n_estimators.to_string()),
            ("max_depth".to_string(), p.max_depth.to_string()),
            ("eta".to_string(), p.eta.to_string()),
            ("lambda".to_string(), p.lambda.to_string()),
            ("gamma".to_string(), p.gamma.to_string()),
            ("min_child_weight".to_string(), p.min_child_weight.to_string()),
            ("subsample".to_string(), p.subsample.to_string()),
            ("objective".to_string(), "binary:logistic".to_string()),
            ("seed".to_string(), self.seed.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = array![[0.0], [1.0], [2.0], [3.0], [6.0], [7.0], [8.0], [9.0]];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    fn log_loss(y: &Array1<f64>, p: &Array1<f64>) -> f64 {
        y.iter()
            .zip(p.iter())
            .map(|(t, p)| -(t * p.ln() + (1.0 - t) * (1.0 - p).ln()))
            .sum::<f64>()
            / y.len() as f64
    }

    fn rounds(n_estimators: usize) -> BoostingParams {
        BoostingParams {
            n_estimators,
            min_child_weight: 0.0,
            ..BoostingParams::default()
        }
    }

    #[test]
    fn test_more_rounds_lower_loss() {
        let (x, y) = data();
        let mut short = GradientBoosting::new(rounds(1), 42);
        let mut long = GradientBoosting::new(rounds(20), 42);
        short.fit(&x, &y).unwrap();
        long.fit(&x, &y).unwrap();

        let short_loss = log_loss(&y, &short.predict_proba(&x).unwrap());
        let long_loss = log_loss(&y, &long.predict_proba(&x).unwrap());
        assert!(long_loss < short_loss);
        assert!(long_loss < 2f64.ln());
        assert_eq!(long.predict(&x).unwrap(), array![0, 0, 0, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn test_subsample_is_seeded() {
        let (x, y) = data();
        let params = BoostingParams {
            subsample: 0.5,
            ..rounds(5)
        };
        let mut a = GradientBoosting::new(params.clone(), 7);
        let mut b = GradientBoosting::new(params, 7);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_booster_survives_serde() {
        let (x, y) = data();
        let mut model = GradientBoosting::new(rounds(10), 42);
        model.fit(&x, &y).unwrap();
        assert!(!model.booster_bytes().is_empty());

        let json = serde_json::to_string(&model).unwrap();
        let restored: GradientBoosting = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, model);
        assert_eq!(restored.predict_proba(&x).unwrap(), model.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_unfitted_and_wrong_width() {
        let (x, y) = data();
        let mut model = GradientBoosting::new(rounds(3), 42);
        assert!(model.predict_proba(&x).is_err());
        model.fit(&x, &y).unwrap();
        assert!(model.predict_proba(&array![[0.0, 1.0]]).is_err());
    }

    #[test]
    fn test_invalid_subsample() {
        let (x, y) = data();
        let mut model = GradientBoosting::new(
            BoostingParams {
                subsample: 0.0,
                ..BoostingParams::default()
            },
            42,
        );
        assert!(model.fit(&x, &y).is_err());
    }
}
