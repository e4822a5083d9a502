//! Classification objectives.

use rayon::prelude::*;

use crate::data::Metadata;
use crate::error::{Error, Result};
use crate::objective::ObjectiveFunction;

// =============================================================================
// BinaryLogloss
// =============================================================================

/// Binary log-loss with a sigmoid scale.
///
/// Labels are {0, 1}, handled internally as {-1, +1}. For a row with signed
/// label `y` and score `s`:
///
/// ```text
/// response = -2·σ·y / (1 + exp(2·σ·y·s))
/// gradient = response · w
/// hessian  = |response| · (2·σ − |response|) · w
/// ```
///
/// With `is_unbalance`, the rarer class is up-weighted by the class-count
/// ratio.
pub struct BinaryLogloss {
    sigmoid: f64,
    is_unbalance: bool,
    /// Signed labels, one per row.
    label: Vec<i8>,
    weights: Option<Vec<f32>>,
    /// Extra weight for [negative, positive] labels.
    label_weights: [f64; 2],
}

impl BinaryLogloss {
    pub fn new(sigmoid: f64, is_unbalance: bool) -> Self {
        Self {
            sigmoid,
            is_unbalance,
            label: Vec::new(),
            weights: None,
            label_weights: [1.0, 1.0],
        }
    }
}

impl ObjectiveFunction for BinaryLogloss {
    fn init(&mut self, metadata: &Metadata, num_data: usize) -> Result<()> {
        let mut cnt_positive = 0usize;
        let mut cnt_negative = 0usize;
        self.label = metadata
            .label()
            .iter()
            .map(|&l| {
                if l > 0.0 {
                    cnt_positive += 1;
                    1i8
                } else {
                    cnt_negative += 1;
                    -1i8
                }
            })
            .collect();
        if self.label.len() != num_data {
            return Err(Error::DataShape("label length != num_data".into()));
        }
        if cnt_positive == 0 || cnt_negative == 0 {
            log::warn!("binary objective: training data contains only one class");
        }
        self.label_weights = [1.0, 1.0];
        if self.is_unbalance && cnt_positive > 0 && cnt_negative > 0 {
            if cnt_positive > cnt_negative {
                self.label_weights[0] = cnt_positive as f64 / cnt_negative as f64;
            } else {
                self.label_weights[1] = cnt_negative as f64 / cnt_positive as f64;
            }
        }
        self.weights = metadata.weights().map(<[f32]>::to_vec);
        Ok(())
    }

    fn get_gradients(&self, score: &[f64], gradients: &mut [f32], hessians: &mut [f32]) {
        let sigmoid = self.sigmoid;
        let label = &self.label;
        let label_weights = self.label_weights;
        let weights = self.weights.as_deref();
        gradients
            .par_iter_mut()
            .zip(hessians.par_iter_mut())
            .enumerate()
            .for_each(|(i, (grad, hess))| {
                let y = label[i] as f64;
                let w = label_weights[usize::from(label[i] > 0)]
                    * weights.map_or(1.0, |w| w[i] as f64);
                let response = -2.0 * sigmoid * y / (1.0 + (2.0 * sigmoid * y * score[i]).exp());
                let abs_response = response.abs();
                *grad = (response * w) as f32;
                *hess = (abs_response * (2.0 * sigmoid - abs_response) * w) as f32;
            });
    }

    fn convert_output(&self, raw: &mut [f64]) {
        for value in raw {
            *value = 1.0 / (1.0 + (-2.0 * self.sigmoid * *value).exp());
        }
    }

    fn name(&self) -> &'static str {
        "binary"
    }

    fn sigmoid(&self) -> f64 {
        self.sigmoid
    }
}

// =============================================================================
// MulticlassSoftmax
// =============================================================================

/// Softmax cross-entropy over `K` classes, one tree per class per iteration.
///
/// Labels must be integers in `[0, K)`. The hessian carries the
/// `K' / (K' − 1)` normalizer over non-empty classes.
pub struct MulticlassSoftmax {
    num_class: usize,
    label: Vec<u32>,
    weights: Option<Vec<f32>>,
    hessian_normalizer: f64,
}

impl MulticlassSoftmax {
    pub fn new(num_class: usize) -> Self {
        Self {
            num_class,
            label: Vec::new(),
            weights: None,
            hessian_normalizer: 1.0,
        }
    }
}

impl ObjectiveFunction for MulticlassSoftmax {
    fn init(&mut self, metadata: &Metadata, num_data: usize) -> Result<()> {
        let mut count_per_class = vec![0usize; self.num_class];
        self.label = metadata
            .label()
            .iter()
            .map(|&l| {
                let k = l as i64;
                if k < 0 || k >= self.num_class as i64 {
                    return Err(Error::DataShape(format!(
                        "label must be in [0, {}), found {}",
                        self.num_class, l
                    )));
                }
                count_per_class[k as usize] += 1;
                Ok(k as u32)
            })
            .collect::<Result<_>>()?;
        if self.label.len() != num_data {
            return Err(Error::DataShape("label length != num_data".into()));
        }
        let non_empty = count_per_class.iter().filter(|&&c| c > 0).count().max(2);
        self.hessian_normalizer = non_empty as f64 / (non_empty - 1) as f64;
        self.weights = metadata.weights().map(<[f32]>::to_vec);
        Ok(())
    }

    fn get_gradients(&self, score: &[f64], gradients: &mut [f32], hessians: &mut [f32]) {
        let num_data = self.label.len();
        let num_class = self.num_class;

        // Row-wise softmax, numerically stabilized by the row max.
        let mut probabilities = vec![0.0f64; num_data * num_class];
        probabilities
            .par_chunks_mut(num_data)
            .enumerate()
            .for_each(|(k, prob_k)| {
                let offset = k * num_data;
                prob_k.copy_from_slice(&score[offset..offset + num_data]);
            });
        // Normalization runs per row; rows are independent.
        let normalizer: Vec<(f64, f64)> = (0..num_data)
            .into_par_iter()
            .map(|i| {
                let mut row_max = f64::NEG_INFINITY;
                for k in 0..num_class {
                    row_max = row_max.max(score[k * num_data + i]);
                }
                let mut denom = 0.0;
                for k in 0..num_class {
                    denom += (score[k * num_data + i] - row_max).exp();
                }
                (row_max, denom)
            })
            .collect();
        probabilities
            .par_chunks_mut(num_data)
            .for_each(|prob_k| {
                for (i, p) in prob_k.iter_mut().enumerate() {
                    let (row_max, denom) = normalizer[i];
                    *p = (*p - row_max).exp() / denom;
                }
            });

        let label = &self.label;
        let weights = self.weights.as_deref();
        let normalizer = self.hessian_normalizer;
        gradients
            .par_chunks_mut(num_data)
            .zip(hessians.par_chunks_mut(num_data))
            .enumerate()
            .for_each(|(k, (grad_k, hess_k))| {
                let prob_k = &probabilities[k * num_data..(k + 1) * num_data];
                for i in 0..num_data {
                    let p = prob_k[i];
                    let y = if label[i] == k as u32 { 1.0 } else { 0.0 };
                    let w = weights.map_or(1.0, |w| w[i] as f64);
                    grad_k[i] = ((p - y) * w) as f32;
                    hess_k[i] = (normalizer * p * (1.0 - p) * w) as f32;
                }
            });
    }

    fn convert_output(&self, raw: &mut [f64]) {
        let row_max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut denom = 0.0;
        for value in raw.iter_mut() {
            *value = (*value - row_max).exp();
            denom += *value;
        }
        for value in raw.iter_mut() {
            *value /= denom;
        }
    }

    fn name(&self) -> &'static str {
        "multiclass"
    }

    fn num_tree_per_iteration(&self) -> usize {
        self.num_class
    }
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
    fn test_binary_gradient_signs() {
        let meta = metadata_with(&[0.0, 1.0]);
        let mut objective = BinaryLogloss::new(1.0, false);
        objective.init(&meta, 2).unwrap();

        let score = vec![0.0, 0.0];
        let mut grad = vec![0.0f32; 2];
        let mut hess = vec![0.0f32; 2];
        objective.get_gradients(&score, &mut grad, &mut hess);

        // Negative label pushes score down, positive label pushes it up.
        assert!(grad[0] > 0.0);
        assert!(grad[1] < 0.0);
        assert!(hess[0] > 0.0 && hess[1] > 0.0);
        assert!((grad[0] + grad[1]).abs() < 1e-6);
    }

    #[test]
    fn test_binary_convert_output_is_scaled_sigmoid() {
        let objective = BinaryLogloss::new(0.5, false);
        let mut raw = vec![0.0];
        objective.convert_output(&mut raw);
        assert!((raw[0] - 0.5).abs() < 1e-12);

        let mut raw = vec![10.0];
        objective.convert_output(&mut raw);
        assert!(raw[0] > 0.99);
    }

    #[test]
    fn test_unbalance_upweights_rare_class() {
        let meta = metadata_with(&[0.0, 0.0, 0.0, 1.0]);
        let mut objective = BinaryLogloss::new(1.0, true);
        objective.init(&meta, 4).unwrap();
        assert!((objective.label_weights[1] - 3.0).abs() < 1e-12);
        assert!((objective.label_weights[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_multiclass_label_out_of_range_fatal() {
        let meta = metadata_with(&[0.0, 3.0]);
        let mut objective = MulticlassSoftmax::new(3);
        assert!(objective.init(&meta, 2).is_err());
    }

    #[test]
    fn test_multiclass_gradients_sum_to_zero_per_row() {
        let meta = metadata_with(&[0.0, 1.0, 2.0]);
        let mut objective = MulticlassSoftmax::new(3);
        objective.init(&meta, 3).unwrap();

        let score = vec![0.1, 0.2, -0.3, 0.0, 0.5, -0.1, 0.4, 0.0, 0.2];
        let mut grad = vec![0.0f32; 9];
        let mut hess = vec![0.0f32; 9];
        objective.get_gradients(&score, &mut grad, &mut hess);

        for i in 0..3 {
            let total: f32 = (0..3).map(|k| grad[k * 3 + i]).sum();
            assert!(total.abs() < 1e-5);
        }
        assert!(hess.iter().all(|&h| h > 0.0));
    }

    #[test]
    fn test_multiclass_true_class_gradient_negative() {
        let meta = metadata_with(&[1.0]);
        let mut objective = MulticlassSoftmax::new(2);
        objective.init(&meta, 1).unwrap();

        let score = vec![0.0, 0.0];
        let mut grad = vec![0.0f32; 2];
        let mut hess = vec![0.0f32; 2];
        objective.get_gradients(&score, &mut grad, &mut hess);
        assert!(grad[1] < 0.0);
        assert!(grad[0] > 0.0);
    }

    #[test]
    fn test_softmax_convert_output() {
        let objective = MulticlassSoftmax::new(3);
        let mut raw = vec![1.0, 1.0, 1.0];
        objective.convert_output(&mut raw);
        for p in &raw {
            assert!((p - 1.0 / 3.0).abs() < 1e-12);
        }
    }
}
