use serde::{Deserialize, Serialize};

use crate::error::ForecastError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl ScalerParams {
    /// Fit per-column mean and deviation. Returns `None` for an empty matrix.
    pub fn fit<R: AsRef<[f64]>>(rows: &[R]) -> Result<Option<Self>, ForecastError> {
        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let width = first.as_ref().len();
        let n = rows.len() as f64;

        let mut mean = vec![0.0; width];
        for row in rows {
            let row = row.as_ref();
            if row.len() != width {
                return Err(ForecastError::FeatureWidth {
                    expected: width,
                    actual: row.len(),
                });
            }
            for (acc, value) in mean.iter_mut().zip(row) {
                *acc += value;
            }
        }
        for value in mean.iter_mut() {
            *value /= n;
        }

        let mut variance = vec![0.0; width];
        for row in rows {
            for ((acc, value), m) in variance.iter_mut().zip(row.as_ref()).zip(&mean) {
                *acc += (value - m).powi(2);
            }
        }

        let scale = variance
            .into_iter()
            .map(|v| {
                let std = (v / n).sqrt();
                if std < f64::EPSILON {
                    1.0
                } else {
                    std
                }
            })
            .collect();

        Ok(Some(Self { mean, scale }))
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>, ForecastError> {
        if row.len() != self.width() {
            return Err(ForecastError::FeatureWidth {
                expected: self.width(),
                actual: row.len(),
            });
        }

        Ok(row
            .iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((x, mean), scale)| (x - mean) / scale)
            .collect())
    }

    pub fn transform_all<R: AsRef<[f64]>>(&self, rows: &[R]) -> Result<Vec<Vec<f64>>, ForecastError> {
        rows.iter().map(|row| self.transform(row.as_ref())).collect()
    }
}
