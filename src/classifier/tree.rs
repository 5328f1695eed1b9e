use std::collections::BTreeMap;

use linfa::prelude::*;
use linfa_trees::{DecisionTree, SplitQuality, TreeNode};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::TrainingError;

/// Entropy tree whose leaves report the positive fraction of the training
/// rows that reached them, rather than the majority label.
#[derive(Serialize, Deserialize)]
pub struct TreeModel {
    tree: DecisionTree<f64, usize>,
    leaf_rates: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
        }
    }
}

/// Walk to the leaf that `row` lands in, returning the leaf and its
/// left/right path from the root.
fn descend<'t>(tree: &'t DecisionTree<f64, usize>, row: &[f64]) -> (&'t TreeNode<f64, usize>, String) {
    let mut node = tree.root_node();
    let mut path = String::new();
    while !node.is_leaf() {
        let (feature, threshold, _) = node.split();
        let value = row.get(feature).copied().unwrap_or(0.0);
        let (side, step) = if value < threshold { (0, 'L') } else { (1, 'R') };
        match node.children().get(side).copied().and_then(Option::as_deref) {
            Some(child) => {
                node = child;
                path.push(step);
            }
            None => break,
        }
    }
    (node, path)
}

impl TreeParams {
    pub fn fit(&self, x: &Array2<f64>, y: &[u8]) -> Result<TreeModel, TrainingError> {
        let targets: Array1<usize> = y.iter().map(|&label| usize::from(label)).collect();
        let dataset = Dataset::new(x.clone(), targets);

        let tree = DecisionTree::params()
            .split_quality(SplitQuality::Entropy)
            .max_depth(Some(self.max_depth))
            .min_weight_split(self.min_samples_split as f32)
            .min_weight_leaf(self.min_samples_leaf as f32)
            .fit(&dataset)
            .map_err(|e| TrainingError::Fit(e.to_string()))?;

        let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for (row, &label) in x.outer_iter().zip(y) {
            let row = row.to_vec();
            let (_, path) = descend(&tree, &row);
            let entry = counts.entry(path).or_default();
            entry.0 += usize::from(label == 1);
            entry.1 += 1;
        }
        let leaf_rates = counts
            .into_iter()
            .map(|(path, (positives, total))| (path, positives as f64 / total as f64))
            .collect();

        Ok(TreeModel { tree, leaf_rates })
    }
}

impl TreeModel {
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let (leaf, path) = descend(&self.tree, row);
        match self.leaf_rates.get(&path) {
            Some(&rate) => rate,
            None => leaf.prediction().map_or(0.5, |label| label as f64),
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.tree.num_leaves()
    }
}
