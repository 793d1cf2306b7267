use super::{check_fit_input, sigmoid, Classifier};
use crate::config::LogisticParams;
use anyhow::Result;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// L2-regularised logistic regression fitted by batch gradient descent on
/// standardised features.
///
/// Minimises `mean(log_loss) + ||w||^2 / (2 * C * n)`, the per-sample form
/// of the usual `C * sum(log_loss) + ||w||^2 / 2` objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    params: LogisticParams,
    mean: Vec<f64>,
    scale: Vec<f64>,
    coef: Vec<f64>,
    intercept: f64,
}

impl LogisticRegression {
    pub fn new(params: LogisticParams) -> Self {
        Self {
            params,
            mean: Vec::new(),
            scale: Vec::new(),
            coef: Vec::new(),
            intercept: 0.0,
        }
    }

    /// Coefficients in standardised feature space.
    pub fn coef(&self) -> &[f64] {
        &self.coef
    }

    fn standardise(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.coef.len() {
            anyhow::bail!(
                "Expected {} features, got {}",
                self.coef.len(),
                x.ncols()
            );
        }
        let mean = Array1::from(self.mean.clone());
        let scale = Array1::from(self.scale.clone());
        Ok((x - &mean) / &scale)
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_fit_input(x, y)?;
        let n = x.nrows() as f64;

        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 { s } else { 1.0 });
        let xs = (x - &mean) / &scale;

        let mut w = Array1::<f64>::zeros(x.ncols());
        let mut b = 0.0;
        let penalty = 1.0 / (self.params.c * n);
        let lr = self.params.learning_rate;

        let mut iterations = self.params.max_iter;
        for iter in 0..self.params.max_iter {
            let p = (xs.dot(&w) + b).mapv(sigmoid);
            let err = &p - y;
            let grad_w = xs.t().dot(&err) / n + &w * penalty;
            let grad_b = err.sum() / n;

            w.scaled_add(-lr, &grad_w);
            b -= lr * grad_b;

            let max_grad = grad_w.iter().fold(grad_b.abs(), |m, g| m.max(g.abs()));
            if max_grad < self.params.tolerance {
                iterations = iter + 1;
                break;
            }
        }
        if iterations == self.params.max_iter {
            tracing::debug!("Logistic regression reached max_iter={}", iterations);
        } else {
            tracing::debug!("Logistic regression converged after {} iterations", iterations);
        }

        self.mean = mean.to_vec();
        self.scale = scale.to_vec();
        self.coef = w.to_vec();
        self.intercept = b;
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let xs = self.standardise(x)?;
        let w = Array1::from(self.coef.clone());
        Ok((xs.dot(&w) + self.intercept).mapv(sigmoid))
    }

    fn params(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("max_iter".to_string(), self.params.max_iter.to_string()),
            ("learning_rate".to_string(), self.params.learning_rate.to_string()),
            ("C".to_string(), self.params.c.to_string()),
            ("tol".to_string(), self.params.tolerance.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fits_separable_data() {
        let x = array![[0.0, 1.0], [1.0, 1.0], [2.0, 1.0], [8.0, 1.0], [9.0, 1.0], [10.0, 1.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut model = LogisticRegression::new(LogisticParams::default());
        model.fit(&x, &y).unwrap();

        let proba = model.predict_proba(&x).unwrap();
        assert!(proba[0] < 0.5 && proba[5] > 0.5);
        assert!(proba.windows(2).into_iter().all(|w| w[0] <= w[1]));
        // Constant column gets no weight
        assert_eq!(model.coef()[1], 0.0);
        assert_eq!(model.predict(&x).unwrap(), array![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_stronger_regularisation_shrinks_weights() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];

        let mut loose = LogisticRegression::new(LogisticParams::default());
        loose.fit(&x, &y).unwrap();
        let mut tight = LogisticRegression::new(LogisticParams {
            c: 0.01,
            ..LogisticParams::default()
        });
        tight.fit(&x, &y).unwrap();

        assert!(tight.coef()[0].abs() < loose.coef()[0].abs());
    }

    #[test]
    fn test_rejects_feature_mismatch() {
        let mut model = LogisticRegression::new(LogisticParams::default());
        model.fit(&array![[0.0], [1.0]], &array![0.0, 1.0]).unwrap();
        assert!(model.predict_proba(&array![[0.0, 1.0]]).is_err());
    }
}
