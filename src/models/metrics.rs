//! Binary classification metrics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fraction of predictions equal to the label.
pub fn accuracy(y_true: &[i64], y_pred: &[i64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

/// F1 score of the positive class (1). Zero when there are no true positives.
pub fn f1_score(y_true: &[i64], y_pred: &[i64]) -> f64 {
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for (&t, &p) in y_true.iter().zip(y_pred) {
        match (t == 1, p == 1) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    if tp == 0 {
        return 0.0;
    }
    2.0 * tp as f64 / (2 * tp + fp + fn_) as f64
}

/// Area under the ROC curve via the rank-sum statistic, with tied scores
/// given their average rank. `None` when only one class is present.
pub fn roc_auc(y_true: &[i64], scores: &[f64]) -> Option<f64> {
    let n_pos = y_true.iter().filter(|&&t| t == 1).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; the tie group i..=j shares the mean rank
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            if y_true[k] == 1 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Holdout evaluation of one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub accuracy: f64,
    pub f1: f64,
    pub roc_auc: Option<f64>,
}

impl Evaluation {
    /// Evaluate probabilities against labels with a 0.5 decision threshold.
    pub fn from_proba(y_true: &[i64], proba: &[f64]) -> Self {
        let y_pred: Vec<i64> = proba.iter().map(|&p| i64::from(p >= 0.5)).collect();
        Self {
            accuracy: accuracy(y_true, &y_pred),
            f1: f1_score(y_true, &y_pred),
            roc_auc: roc_auc(y_true, proba),
        }
    }

    /// Metric map with each name prefixed (`""` or `"oot_"`).
    pub fn to_metrics(&self, prefix: &str) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::from([
            (format!("{prefix}accuracy"), self.accuracy),
            (format!("{prefix}f1"), self.f1),
        ]);
        if let Some(auc) = self.roc_auc {
            metrics.insert(format!("{prefix}roc_auc"), auc);
        }
        metrics
    }
}

impl std::fmt::Display for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "accuracy={:.4} f1={:.4}", self.accuracy, self.f1)?;
        match self.roc_auc {
            Some(auc) => write!(f, " roc_auc={:.4}", auc),
            None => write!(f, " roc_auc=n/a"),
        }
    }
}
