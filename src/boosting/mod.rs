//! Boosting controllers and the trained-model surface.

mod dart;
mod gbdt;
mod model;

pub use dart::Dart;
pub use gbdt::Gbdt;
pub use model::{feature_importance, LoadedModel};

use crate::config::{BoostingType, Config};
use crate::data::Dataset;
use crate::error::Result;

/// Capability set a boosting controller presents to the application layer.
///
/// Registered datasets are addressed by index: 0 is the training data,
/// `1..` the validation datasets in registration order.
pub trait Boosting<'a> {
    /// Register a validation dataset (before training starts). It must have
    /// been built with the training dataset as reference so bin mappers are
    /// shared.
    fn add_valid_data(&mut self, data: &'a Dataset) -> Result<()>;

    /// Run the full training loop, honoring `num_iterations`, early stopping
    /// and `output_model`.
    fn train(&mut self) -> Result<()>;

    /// Run one boosting iteration. Gradients and hessians may be supplied by
    /// the caller (both or neither); otherwise the objective provides them.
    /// Returns true when training is finished and no further iterations
    /// should run.
    fn train_one_iter(
        &mut self,
        gradients: Option<&[f32]>,
        hessians: Option<&[f32]>,
        is_eval: bool,
    ) -> Result<bool>;

    /// Metric values for a registered dataset.
    fn eval_at(&self, data_idx: usize) -> Vec<f64>;

    /// Raw class-major scores of a registered dataset.
    fn score_of(&self, data_idx: usize) -> &[f64];

    /// Transformed (sigmoid/softmax) outputs of a registered dataset.
    fn predict_of(&self, data_idx: usize) -> Vec<f64>;

    /// Completed iterations currently used for prediction.
    fn num_iterations_trained(&self) -> usize;

    fn save_model(&self, path: &str) -> Result<()>;

    fn to_model_string(&self) -> String;

    /// Replace the tree list from a serialized model.
    fn models_from_string(&mut self, text: &str) -> Result<()>;

    /// Raw score per class for one row of raw feature values.
    fn predict_raw(&self, features: &[f64]) -> Vec<f64>;

    /// Transformed output per class for one row.
    fn predict(&self, features: &[f64]) -> Vec<f64>;

    /// Leaf index in every used tree.
    fn predict_leaf_index(&self, features: &[f64]) -> Vec<i32>;

    fn boosting_type(&self) -> BoostingType;
}

/// Instantiate the controller selected by `boosting_type`.
pub fn create_boosting<'a>(
    config: &Config,
    train_data: &'a Dataset,
) -> Result<Box<dyn Boosting<'a> + 'a>> {
    Ok(match config.boosting_type {
        BoostingType::Gbdt => Box::new(Gbdt::new(config, train_data)?),
        BoostingType::Dart => Box::new(Dart::new(config, train_data)?),
    })
}
