//! Binary decision trees stored as a flat node arena, grown as CART
//! classifiers on Gini impurity for the random forest.

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

/// A node of the arena. Children are indices into [`Tree::nodes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A fitted tree. Node 0 is the root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<TreeNode>,
}

impl Tree {
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], id: usize) -> usize {
            match nodes[id] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Leaf value for one row. Rows go left when `x[feature] <= threshold`.
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes.get(id) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    id = if row[*feature] <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    /// Reserve a slot for a node whose children are not grown yet.
    fn reserve(&mut self) -> usize {
        self.nodes.push(TreeNode::Leaf { value: 0.0 });
        self.nodes.len() - 1
    }
}

/// Best split found for a node.
struct Candidate {
    feature: usize,
    threshold: f64,
    score: f64,
}

/// Sort `rows` by feature `j` and return them with their values.
fn sorted_by_feature(x: &Array2<f64>, rows: &[usize], j: usize) -> Vec<(f64, usize)> {
    let mut pairs: Vec<(f64, usize)> = rows.iter().map(|&r| (x[[r, j]], r)).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    pairs
}

fn partition(x: &Array2<f64>, rows: &[usize], feature: usize, threshold: f64) -> (Vec<usize>, Vec<usize>) {
    rows.iter().copied().partition(|&r| x[[r, feature]] <= threshold)
}

/// Growth limits for Gini trees.
#[derive(Debug, Clone, Copy)]
pub struct GiniParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub max_features: usize,
}

/// Grow a classification tree on the given (possibly repeated) rows.
/// Leaves hold the fraction of positive labels.
pub fn grow_gini(
    x: &Array2<f64>,
    y: &[f64],
    rows: &[usize],
    params: GiniParams,
    rng: &mut StdRng,
) -> Tree {
    let mut tree = Tree::default();
    grow_gini_node(&mut tree, x, y, rows.to_vec(), 0, params, rng);
    tree
}

fn gini(pos: f64, n: f64) -> f64 {
    if n == 0.0 {
        return 0.0;
    }
    let p = pos / n;
    2.0 * p * (1.0 - p)
}

fn grow_gini_node(
    tree: &mut Tree,
    x: &Array2<f64>,
    y: &[f64],
    rows: Vec<usize>,
    depth: usize,
    params: GiniParams,
    rng: &mut StdRng,
) -> usize {
    let id = tree.reserve();
    let n = rows.len() as f64;
    let pos: f64 = rows.iter().map(|&r| y[r]).sum();
    let value = if n > 0.0 { pos / n } else { 0.0 };

    let depth_reached = params.max_depth.is_some_and(|d| depth >= d);
    let pure = pos == 0.0 || pos == n;
    if depth_reached || pure || rows.len() < params.min_samples_split.max(2) {
        tree.nodes[id] = TreeNode::Leaf { value };
        return id;
    }

    let n_features = x.ncols();
    let features = sample(rng, n_features, params.max_features.clamp(1, n_features));
    let parent = gini(pos, n);
    let mut best: Option<Candidate> = None;

    for j in features.iter() {
        let sorted = sorted_by_feature(x, &rows, j);
        let mut left_pos = 0.0;
        for k in 0..sorted.len() - 1 {
            left_pos += y[sorted[k].1];
            let (lo, hi) = (sorted[k].0, sorted[k + 1].0);
            if lo == hi {
                continue;
            }
            let n_left = (k + 1) as f64;
            let n_right = n - n_left;
            let weighted = (n_left * gini(left_pos, n_left) + n_right * gini(pos - left_pos, n_right)) / n;
            if weighted < parent && best.as_ref().map_or(true, |b| weighted < b.score) {
                best = Some(Candidate {
                    feature: j,
                    threshold: lo + (hi - lo) / 2.0,
                    score: weighted,
                });
            }
        }
    }

    let Some(split) = best else {
        tree.nodes[id] = TreeNode::Leaf { value };
        return id;
    };

    let (left_rows, right_rows) = partition(x, &rows, split.feature, split.threshold);
    let left = grow_gini_node(tree, x, y, left_rows, depth + 1, params, rng);
    let right = grow_gini_node(tree, x, y, right_rows, depth + 1, params, rng);
    tree.nodes[id] = TreeNode::Split {
        feature: split.feature,
        threshold: split.threshold,
        left,
        right,
    };
    id
}
