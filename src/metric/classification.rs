//! Classification metrics.

use crate::data::Metadata;
use crate::error::{Error, Result};
use crate::metric::{weighted_mean, Metric};

const PROB_EPSILON: f64 = 1e-15;

// =============================================================================
// Binary
// =============================================================================

/// Binary cross-entropy, with the same scaled sigmoid the binary objective
/// uses: `p = 1 / (1 + exp(-2·σ·s))`.
pub struct BinaryLoglossMetric {
    sigmoid: f64,
    label: Vec<f32>,
    weights: Option<Vec<f32>>,
}

impl BinaryLoglossMetric {
    pub fn new(sigmoid: f64) -> Self {
        Self {
            sigmoid,
            label: Vec::new(),
            weights: None,
        }
    }
}

impl Metric for BinaryLoglossMetric {
    fn init(&mut self, metadata: &Metadata, _num_data: usize) -> Result<()> {
        self.label = metadata.label().to_vec();
        self.weights = metadata.weights().map(<[f32]>::to_vec);
        Ok(())
    }

    fn eval(&self, score: &[f64]) -> Vec<f64> {
        let sigmoid = self.sigmoid;
        let value = weighted_mean(self.label.len(), self.weights.as_deref(), |i| {
            let p = (1.0 / (1.0 + (-2.0 * sigmoid * score[i]).exp()))
                .clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
            if self.label[i] > 0.0 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        });
        vec![value]
    }

    fn is_bigger_better(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "binary_logloss"
    }
}

/// Fraction of rows on the wrong side of the decision boundary (`s > 0`).
#[derive(Default)]
pub struct BinaryErrorMetric {
    label: Vec<f32>,
    weights: Option<Vec<f32>>,
}

impl BinaryErrorMetric {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for BinaryErrorMetric {
    fn init(&mut self, metadata: &Metadata, _num_data: usize) -> Result<()> {
        self.label = metadata.label().to_vec();
        self.weights = metadata.weights().map(<[f32]>::to_vec);
        Ok(())
    }

    fn eval(&self, score: &[f64]) -> Vec<f64> {
        let value = weighted_mean(self.label.len(), self.weights.as_deref(), |i| {
            let predicted_positive = score[i] > 0.0;
            let actual_positive = self.label[i] > 0.0;
            if predicted_positive != actual_positive { 1.0 } else { 0.0 }
        });
        vec![value]
    }

    fn is_bigger_better(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "binary_error"
    }
}

// =============================================================================
// Multiclass
// =============================================================================

/// Softmax cross-entropy over a class-major score buffer.
pub struct MulticlassLoglossMetric {
    num_class: usize,
    label: Vec<u32>,
    weights: Option<Vec<f32>>,
}

impl MulticlassLoglossMetric {
    pub fn new(num_class: usize) -> Self {
        Self {
            num_class,
            label: Vec::new(),
            weights: None,
        }
    }
}

/// True-class softmax probability for one row of a class-major buffer.
fn softmax_probability(score: &[f64], num_data: usize, num_class: usize, row: usize, class: usize) -> f64 {
    let mut row_max = f64::NEG_INFINITY;
    for k in 0..num_class {
        row_max = row_max.max(score[k * num_data + row]);
    }
    let mut denom = 0.0;
    for k in 0..num_class {
        denom += (score[k * num_data + row] - row_max).exp();
    }
    (score[class * num_data + row] - row_max).exp() / denom
}

impl Metric for MulticlassLoglossMetric {
    fn init(&mut self, metadata: &Metadata, _num_data: usize) -> Result<()> {
        self.label = label_indices(metadata, self.num_class)?;
        self.weights = metadata.weights().map(<[f32]>::to_vec);
        Ok(())
    }

    fn eval(&self, score: &[f64]) -> Vec<f64> {
        let num_data = self.label.len();
        let value = weighted_mean(num_data, self.weights.as_deref(), |i| {
            let p = softmax_probability(score, num_data, self.num_class, i, self.label[i] as usize)
                .max(PROB_EPSILON);
            -p.ln()
        });
        vec![value]
    }

    fn is_bigger_better(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "multi_logloss"
    }
}

/// Fraction of rows whose argmax class is wrong.
pub struct MulticlassErrorMetric {
    num_class: usize,
    label: Vec<u32>,
    weights: Option<Vec<f32>>,
}

impl MulticlassErrorMetric {
    pub fn new(num_class: usize) -> Self {
        Self {
            num_class,
            label: Vec::new(),
            weights: None,
        }
    }
}

impl Metric for MulticlassErrorMetric {
    fn init(&mut self, metadata: &Metadata, _num_data: usize) -> Result<()> {
        self.label = label_indices(metadata, self.num_class)?;
        self.weights = metadata.weights().map(<[f32]>::to_vec);
        Ok(())
    }

    fn eval(&self, score: &[f64]) -> Vec<f64> {
        let num_data = self.label.len();
        let num_class = self.num_class;
        let value = weighted_mean(num_data, self.weights.as_deref(), |i| {
            let mut best_class = 0usize;
            let mut best_score = f64::NEG_INFINITY;
            for k in 0..num_class {
                let s = score[k * num_data + i];
                if s > best_score {
                    best_score = s;
                    best_class = k;
                }
            }
            if best_class as u32 != self.label[i] { 1.0 } else { 0.0 }
        });
        vec![value]
    }

    fn is_bigger_better(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "multi_error"
    }
}

fn label_indices(metadata: &Metadata, num_class: usize) -> Result<Vec<u32>> {
    metadata
        .label()
        .iter()
        .map(|&l| {
            let k = l as i64;
            if k < 0 || k >= num_class as i64 {
                Err(Error::DataShape(format!(
                    "label must be in [0, {}), found {}",
                    num_class, l
                )))
            } else {
                Ok(k as u32)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_with(label: &[f32]) -> Metadata {
        let mut meta = Metadata::new(label.len(), 1);
        meta.set_label(label).unwrap();
        meta
    }

    #[test]
    fn test_binary_logloss_perfect_and_random() {
        let meta = metadata_with(&[0.0, 1.0]);
        let mut metric = BinaryLoglossMetric::new(1.0);
        metric.init(&meta, 2).unwrap();

        let random = metric.eval(&[0.0, 0.0])[0];
        assert!((random - (2.0f64).ln()).abs() < 1e-9);

        let confident = metric.eval(&[-20.0, 20.0])[0];
        assert!(confident < 1e-6);
    }

    #[test]
    fn test_binary_error() {
        let meta = metadata_with(&[0.0, 1.0, 1.0, 0.0]);
        let mut metric = BinaryErrorMetric::new();
        metric.init(&meta, 4).unwrap();
        let value = metric.eval(&[-1.0, 1.0, -1.0, -1.0]);
        assert!((value[0] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_multiclass_error_argmax() {
        let meta = metadata_with(&[0.0, 2.0]);
        let mut metric = MulticlassErrorMetric::new(3);
        metric.init(&meta, 2).unwrap();
        // Class-major: class 0 = [1, 0], class 1 = [0, 0], class 2 = [0, 5].
        let score = vec![1.0, 0.0, 0.0, 0.0, 0.0, 5.0];
        assert_eq!(metric.eval(&score)[0], 0.0);
    }

    #[test]
    fn test_multiclass_logloss_uniform() {
        let meta = metadata_with(&[1.0]);
        let mut metric = MulticlassLoglossMetric::new(3);
        metric.init(&meta, 1).unwrap();
        let value = metric.eval(&[0.0, 0.0, 0.0]);
        assert!((value[0] - (3.0f64).ln()).abs() < 1e-9);
    }

    #[test]
    fn test_label_out_of_range_rejected() {
        let meta = metadata_with(&[5.0]);
        let mut metric = MulticlassLoglossMetric::new(3);
        assert!(metric.init(&meta, 1).is_err());
    }
}
