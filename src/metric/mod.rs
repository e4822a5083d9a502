//! Evaluation metrics.
//!
//! Metrics are separate from objectives: a model trained with one loss can be
//! monitored with any number of metrics. A metric binds to a dataset's
//! metadata at `init` and evaluates a class-major score buffer into one or
//! more values (most metrics produce exactly one).

mod classification;
mod rank;
mod regression;

pub use classification::{BinaryErrorMetric, BinaryLoglossMetric, MulticlassErrorMetric, MulticlassLoglossMetric};
pub use rank::NdcgMetric;
pub use regression::{L1Metric, L2Metric};

use crate::config::{Config, MetricType};
use crate::data::Metadata;
use crate::error::Result;

/// Evaluation contract presented to the boosting controller.
pub trait Metric: Send + Sync {
    /// Bind to a dataset's metadata.
    fn init(&mut self, metadata: &Metadata, num_data: usize) -> Result<()>;

    /// Evaluate a class-major score buffer.
    fn eval(&self, score: &[f64]) -> Vec<f64>;

    /// Whether larger values are better (true for NDCG, false for losses).
    fn is_bigger_better(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Instantiate one metric.
pub fn create_metric(metric_type: MetricType, config: &Config) -> Box<dyn Metric> {
    match metric_type {
        MetricType::L1 => Box::new(L1Metric::new()),
        MetricType::L2 => Box::new(L2Metric::new()),
        MetricType::BinaryLogloss => Box::new(BinaryLoglossMetric::new(config.sigmoid)),
        MetricType::BinaryError => Box::new(BinaryErrorMetric::new()),
        MetricType::MulticlassLogloss => {
            Box::new(MulticlassLoglossMetric::new(config.num_class))
        }
        MetricType::MulticlassError => Box::new(MulticlassErrorMetric::new(config.num_class)),
        MetricType::Ndcg => Box::new(NdcgMetric::new(
            config.label_gain.clone(),
            config.max_position,
        )),
    }
}

/// Instantiate every configured metric (or the objective's default).
pub fn create_metrics(config: &Config) -> Vec<Box<dyn Metric>> {
    config
        .effective_metrics()
        .into_iter()
        .map(|m| create_metric(m, config))
        .collect()
}

/// Weighted mean helper shared by the simple row-wise metrics.
pub(crate) fn weighted_mean<F: Fn(usize) -> f64>(
    num_data: usize,
    weights: Option<&[f32]>,
    row_value: F,
) -> f64 {
    match weights {
        None => (0..num_data).map(row_value).sum::<f64>() / num_data as f64,
        Some(weights) => {
            let mut value_sum = 0.0;
            let mut weight_sum = 0.0;
            for i in 0..num_data {
                value_sum += row_value(i) * weights[i] as f64;
                weight_sum += weights[i] as f64;
            }
            value_sum / weight_sum
        }
    }
}
