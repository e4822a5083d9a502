//! Objective functions: the gradient/hessian suppliers for boosting.
//!
//! An objective sees the current class-major score buffer and fills the
//! gradient and hessian buffers, all of length `num_data * K`. Objectives
//! copy the metadata views they need at `init`; the core assumes those inputs
//! are stable during training.

mod classification;
mod rank;
mod regression;

pub use classification::{BinaryLogloss, MulticlassSoftmax};
pub use rank::LambdaRank;
pub use regression::RegressionL2;

use crate::config::{Config, ObjectiveType};
use crate::data::Metadata;
use crate::error::Result;

/// Loss function contract presented to the boosting controller.
pub trait ObjectiveFunction: Send + Sync {
    /// Bind to a training dataset's metadata. Validates labels and required
    /// side data (e.g. query boundaries for ranking).
    fn init(&mut self, metadata: &Metadata, num_data: usize) -> Result<()>;

    /// Fill gradients and hessians from the current scores.
    ///
    /// All three buffers are class-major with length `num_data * K`.
    fn get_gradients(&self, score: &[f64], gradients: &mut [f32], hessians: &mut [f32]);

    /// Transform one row's raw scores into the output space (sigmoid,
    /// softmax, ...). Identity by default.
    fn convert_output(&self, _raw: &mut [f64]) {}

    fn name(&self) -> &'static str;

    /// Trees trained per boosting iteration (`K` for softmax, else 1).
    fn num_tree_per_iteration(&self) -> usize {
        1
    }

    /// Sigmoid scale written to the model header; -1 when not applicable.
    fn sigmoid(&self) -> f64 {
        -1.0
    }
}

/// Instantiate the objective selected by the configuration.
pub fn create_objective(config: &Config) -> Box<dyn ObjectiveFunction> {
    match config.objective {
        ObjectiveType::Regression => Box::new(RegressionL2::new()),
        ObjectiveType::Binary => {
            Box::new(BinaryLogloss::new(config.sigmoid, config.is_unbalance))
        }
        ObjectiveType::Multiclass => Box::new(MulticlassSoftmax::new(config.num_class)),
        ObjectiveType::LambdaRank => Box::new(LambdaRank::new(
            config.sigmoid,
            config.label_gain.clone(),
            config.max_position,
        )),
    }
}
