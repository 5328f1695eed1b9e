use linfa::prelude::*;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::TrainingError;

#[derive(Serialize, Deserialize)]
pub struct LogisticModel {
    fitted: FittedLogisticRegression<f64, usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct LogisticParams {
    /// Inverse regularisation strength.
    pub c: f64,
    pub max_iter: u64,
    pub tolerance: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            tolerance: 1e-6,
        }
    }
}

impl LogisticParams {
    pub fn fit(&self, x: &Array2<f64>, y: &[u8]) -> Result<LogisticModel, TrainingError> {
        let targets: Array1<usize> = y.iter().map(|&label| usize::from(label)).collect();
        let dataset = Dataset::new(x.clone(), targets);

        let fitted = LogisticRegression::default()
            .alpha(1.0 / self.c)
            .max_iterations(self.max_iter)
            .gradient_tolerance(self.tolerance)
            .fit(&dataset)
            .map_err(|e| TrainingError::Fit(e.to_string()))?;

        Ok(LogisticModel { fitted })
    }
}

impl LogisticModel {
    /// Probability of label 1, the larger of the two fitted classes.
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let single = ArrayView1::from(row).insert_axis(Axis(0));
        self.fitted
            .predict_probabilities(&single)
            .first()
            .copied()
            .unwrap_or(0.5)
    }
}
