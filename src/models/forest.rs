use super::tree::{grow_gini, GiniParams, Tree};
use super::{check_fit_input, check_width, Classifier};
use crate::config::ForestParams;
use anyhow::Result;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bagged Gini trees with `sqrt(p)` features considered per split.
///
/// Tree `i` draws its bootstrap sample and feature subsets from
/// `StdRng::seed_from_u64(seed + i)`, so the fitted forest does not depend
/// on how rayon schedules the trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    seed: u64,
    n_features: usize,
    trees: Vec<Tree>,
}

impl RandomForest {
    pub fn new(params: ForestParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            n_features: 0,
            trees: Vec::new(),
        }
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_fit_input(x, y)?;
        if self.params.n_estimators == 0 {
            anyhow::bail!("n_estimators must be > 0");
        }

        let n = x.nrows();
        let p = x.ncols();
        let grow = GiniParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            max_features: ((p as f64).sqrt() as usize).max(1),
        };
        let labels = y.to_vec();
        let seed = self.seed;

        let trees: Vec<Tree> = (0..self.params.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                grow_gini(x, &labels, &rows, grow, &mut rng)
            })
            .collect();

        let mean_depth = trees.iter().map(Tree::depth).sum::<usize>() as f64 / trees.len() as f64;
        tracing::debug!(
            "Random forest: {} trees, max_features={}, mean depth {:.1}",
            trees.len(),
            grow.max_features,
            mean_depth
        );

        self.n_features = p;
        self.trees = trees;
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        check_width(x, self.n_features)?;
        if self.trees.is_empty() {
            anyhow::bail!("Random forest is not fitted");
        }
        let n_trees = self.trees.len() as f64;
        let proba = x
            .rows()
            .into_iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / n_trees)
            .collect();
        Ok(proba)
    }

    fn params(&self) -> BTreeMap<String, String> {
        let max_depth = self
            .params
            .max_depth
            .map_or_else(|| "None".to_string(), |d| d.to_string());
        BTreeMap::from([
            ("n_estimators".to_string(), self.params.n_estimators.to_string()),
            ("max_depth".to_string(), max_depth),
            ("min_samples_split".to_string(), self.params.min_samples_split.to_string()),
            ("max_features".to_string(), "sqrt".to_string()),
            ("random_state".to_string(), self.seed.to_string()),
        ])
    }
}
