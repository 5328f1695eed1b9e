pub mod logistic;
pub mod tree;

use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ForecastError, TrainingError};

pub use logistic::{LogisticModel, LogisticParams};
pub use tree::{TreeModel, TreeParams};

/// Every n-th row of each class is held out for evaluation.
const HOLDOUT_STRIDE: usize = 5;

/// Soft-voting ensemble of a decision tree and a logistic regression.
#[derive(Serialize, Deserialize)]
pub struct VotingClassifier {
    n_features: usize,
    tree: TreeModel,
    logistic: LogisticModel,
}

impl fmt::Debug for VotingClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VotingClassifier")
            .field("n_features", &self.n_features)
            .field("tree_leaves", &self.tree.n_leaves())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub training_rows: usize,
    pub holdout_rows: usize,
    pub tree_accuracy: Option<f64>,
    pub logistic_accuracy: Option<f64>,
    pub ensemble_accuracy: Option<f64>,
}

impl VotingClassifier {
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Probability that the student attends, in `[0, 1]`.
    pub fn predict_proba(&self, row: &[f64]) -> Result<f64, ForecastError> {
        if row.len() != self.n_features {
            return Err(ForecastError::FeatureWidth {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        let p = (self.tree.predict_proba(row) + self.logistic.predict_proba(row)) / 2.0;
        Ok(p.clamp(0.0, 1.0))
    }
}

pub fn stratified_split(y: &[u8]) -> (Vec<usize>, Vec<usize>) {
    let mut seen = [0usize; 2];
    let mut train = Vec::with_capacity(y.len());
    let mut holdout = Vec::with_capacity(y.len() / HOLDOUT_STRIDE + 1);

    for (idx, &label) in y.iter().enumerate() {
        let class = usize::from(label.min(1));
        seen[class] += 1;
        if seen[class] % HOLDOUT_STRIDE == 0 {
            holdout.push(idx);
        } else {
            train.push(idx);
        }
    }

    (train, holdout)
}

fn matrix(rows: &[Vec<f64>]) -> Result<Array2<f64>, TrainingError> {
    let width = rows.first().map_or(0, Vec::len);
    Array2::from_shape_vec((rows.len(), width), rows.concat())
        .map_err(|e| TrainingError::Fit(e.to_string()))
}

fn accuracy(predict: impl Fn(&[f64]) -> f64, x: &[Vec<f64>], y: &[u8]) -> Option<f64> {
    if x.is_empty() {
        return None;
    }
    let correct = x
        .iter()
        .zip(y)
        .filter(|(row, label)| u8::from(predict(row.as_slice()) >= 0.5) == **label)
        .count();
    Some(correct as f64 / x.len() as f64)
}

pub fn train(
    train_x: &[Vec<f64>],
    train_y: &[u8],
    holdout_x: &[Vec<f64>],
    holdout_y: &[u8],
) -> Result<(VotingClassifier, TrainingReport), TrainingError> {
    if train_x.is_empty() || train_y.is_empty() {
        return Err(TrainingError::EmptyDataset);
    }
    let positives = train_y.iter().filter(|&&label| label == 1).count();
    if positives == 0 || positives == train_y.len() {
        return Err(TrainingError::SingleClass(train_y[0]));
    }
    let n_features = train_x[0].len();

    let records = matrix(train_x)?;
    let model = VotingClassifier {
        n_features,
        tree: TreeParams::default().fit(&records, train_y)?,
        logistic: LogisticParams::default().fit(&records, train_y)?,
    };

    let report = TrainingReport {
        training_rows: train_x.len(),
        holdout_rows: holdout_x.len(),
        tree_accuracy: accuracy(|r| model.tree.predict_proba(r), holdout_x, holdout_y),
        logistic_accuracy: accuracy(|r| model.logistic.predict_proba(r), holdout_x, holdout_y),
        ensemble_accuracy: accuracy(
            |r| model.predict_proba(r).unwrap_or(0.0),
            holdout_x,
            holdout_y,
        ),
    };

    info!(
        training_rows = report.training_rows,
        holdout_rows = report.holdout_rows,
        tree_leaves = model.tree.n_leaves(),
        tree_accuracy = ?report.tree_accuracy,
        logistic_accuracy = ?report.logistic_accuracy,
        ensemble_accuracy = ?report.ensemble_accuracy,
        "trained voting classifier"
    );

    Ok((model, report))
}
