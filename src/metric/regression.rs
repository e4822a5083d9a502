//! Regression metrics.

use crate::data::Metadata;
use crate::error::Result;
use crate::metric::{weighted_mean, Metric};

/// Mean squared error.
#[derive(Default)]
pub struct L2Metric {
    label: Vec<f32>,
    weights: Option<Vec<f32>>,
}

impl L2Metric {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for L2Metric {
    fn init(&mut self, metadata: &Metadata, _num_data: usize) -> Result<()> {
        self.label = metadata.label().to_vec();
        self.weights = metadata.weights().map(<[f32]>::to_vec);
        Ok(())
    }

    fn eval(&self, score: &[f64]) -> Vec<f64> {
        let value = weighted_mean(self.label.len(), self.weights.as_deref(), |i| {
            let delta = score[i] - self.label[i] as f64;
            delta * delta
        });
        vec![value]
    }

    fn is_bigger_better(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "l2"
    }
}

/// Mean absolute error.
#[derive(Default)]
pub struct L1Metric {
    label: Vec<f32>,
    weights: Option<Vec<f32>>,
}

impl L1Metric {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for L1Metric {
    fn init(&mut self, metadata: &Metadata, _num_data: usize) -> Result<()> {
        self.label = metadata.label().to_vec();
        self.weights = metadata.weights().map(<[f32]>::to_vec);
        Ok(())
    }

    fn eval(&self, score: &[f64]) -> Vec<f64> {
        let value = weighted_mean(self.label.len(), self.weights.as_deref(), |i| {
            (score[i] - self.label[i] as f64).abs()
        });
        vec![value]
    }

    fn is_bigger_better(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "l1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn metadata_with(label: &[f32]) -> Metadata {
        let mut meta = Metadata::new(label.len(), 1);
        meta.set_label(label).unwrap();
        meta
    }

    #[test]
    fn test_l2_is_mean_squared_error() {
        let meta = metadata_with(&[0.0, 0.0]);
        let mut metric = L2Metric::new();
        metric.init(&meta, 2).unwrap();
        let value = metric.eval(&[1.0, 3.0]);
        assert_abs_diff_eq!(value[0], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_l1_weighted() {
        let mut meta = metadata_with(&[0.0, 0.0]);
        meta.set_weights(&[3.0, 1.0]).unwrap();
        let mut metric = L1Metric::new();
        metric.init(&meta, 2).unwrap();
        let value = metric.eval(&[1.0, 2.0]);
        // (3*1 + 1*2) / 4
        assert_abs_diff_eq!(value[0], 1.25, epsilon = 1e-12);
    }
}
