//! Regression objectives.

use rayon::prelude::*;

use crate::data::Metadata;
use crate::error::Result;
use crate::objective::ObjectiveFunction;

/// Squared-error loss.
///
/// Gradient `score - label`, hessian 1, both scaled by the row weight.
#[derive(Default)]
pub struct RegressionL2 {
    label: Vec<f32>,
    weights: Option<Vec<f32>>,
}

impl RegressionL2 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectiveFunction for RegressionL2 {
    fn init(&mut self, metadata: &Metadata, _num_data: usize) -> Result<()> {
        self.label = metadata.label().to_vec();
        self.weights = metadata.weights().map(<[f32]>::to_vec);
        Ok(())
    }

    fn get_gradients(&self, score: &[f64], gradients: &mut [f32], hessians: &mut [f32]) {
        let label = &self.label;
        match &self.weights {
            None => {
                gradients
                    .par_iter_mut()
                    .zip(hessians.par_iter_mut())
                    .enumerate()
                    .for_each(|(i, (grad, hess))| {
                        *grad = (score[i] - label[i] as f64) as f32;
                        *hess = 1.0;
                    });
            }
            Some(weights) => {
                gradients
                    .par_iter_mut()
                    .zip(hessians.par_iter_mut())
                    .enumerate()
                    .for_each(|(i, (grad, hess))| {
                        *grad = ((score[i] - label[i] as f64) * weights[i] as f64) as f32;
                        *hess = weights[i];
                    });
            }
        }
    }

    fn name(&self) -> &'static str {
        "regression"
    }
}
