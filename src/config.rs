//! Training configuration and the `key=value` parameter surface.
//!
//! Parameters arrive as `key=value` strings (the library and file interfaces
//! speak this dialect). Aliases are resolved here, before anything else sees
//! the keys, and bounds are validated eagerly so that bad configurations fail
//! at setup rather than mid-training.

use std::collections::HashMap;

use crate::error::{Error, Result};

// =============================================================================
// Enumerated parameter values
// =============================================================================

/// What the process should do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Task {
    #[default]
    Train,
    Predict,
}

/// Boosting variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BoostingType {
    #[default]
    Gbdt,
    Dart,
}

impl BoostingType {
    /// Name written as the first line of a model file.
    pub fn as_str(self) -> &'static str {
        match self {
            BoostingType::Gbdt => "gbdt",
            BoostingType::Dart => "dart",
        }
    }
}

/// Objective (loss) selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ObjectiveType {
    #[default]
    Regression,
    Binary,
    Multiclass,
    LambdaRank,
}

/// Metric selector. `metric` accepts a comma-separated list of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricType {
    L1,
    L2,
    BinaryLogloss,
    BinaryError,
    MulticlassLogloss,
    MulticlassError,
    Ndcg,
}

/// Tree learner selector.
///
/// Only the serial learner is implemented in-process; the feature- and
/// data-parallel learners require the collective network layer and fall back
/// to serial with a warning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TreeLearnerType {
    #[default]
    Serial,
    Feature,
    Data,
}

// =============================================================================
// TreeConfig
// =============================================================================

/// Parameters consumed by the tree learner.
#[derive(Clone, Debug)]
pub struct TreeConfig {
    /// Upper bound on leaves per tree.
    pub num_leaves: usize,
    /// Minimum rows per child for a split to be admissible.
    pub min_data_in_leaf: usize,
    /// Minimum hessian sum per child for a split to be admissible.
    pub min_sum_hessian_in_leaf: f64,
    /// L2 regularization on leaf outputs.
    pub lambda_l2: f64,
    /// Fraction of features considered per tree.
    pub feature_fraction: f64,
    /// Seed for per-tree feature sampling.
    pub feature_fraction_seed: u64,
    /// Histogram pool slots. `0` means enough for every leaf (no eviction).
    pub histogram_pool_size: usize,
    /// Which learner to use.
    pub tree_learner: TreeLearnerType,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            num_leaves: 127,
            min_data_in_leaf: 100,
            min_sum_hessian_in_leaf: 10.0,
            lambda_l2: 0.0,
            feature_fraction: 1.0,
            feature_fraction_seed: 2,
            histogram_pool_size: 0,
            tree_learner: TreeLearnerType::Serial,
        }
    }
}

// =============================================================================
// Config
// =============================================================================

/// Full training configuration.
///
/// Use struct construction with `..Default::default()` for programmatic
/// setup, or [`Config::from_params`] / [`Config::from_str_params`] when the
/// parameters come in as strings.
#[derive(Clone, Debug)]
pub struct Config {
    pub task: Task,
    pub objective: ObjectiveType,
    pub boosting_type: BoostingType,
    /// Number of boosting iterations.
    pub num_iterations: usize,
    /// Shrinkage applied to every leaf output at commit time.
    pub learning_rate: f64,
    /// Number of classes (softmax objective only).
    pub num_class: usize,
    /// Worker threads. `0` uses all available hardware threads.
    pub num_threads: usize,

    // --- Dataset construction ---
    /// Upper bound on bins per feature.
    pub max_bin: usize,
    /// Rows sampled to fit bin boundaries.
    pub bin_construct_sample_cnt: usize,
    /// Allow the ordered-sparse representation for sufficiently sparse features.
    pub is_enable_sparse: bool,
    /// Zero-fraction above which a feature is stored sparse.
    pub sparse_threshold: f64,
    /// Seed for the binning row sample.
    pub data_random_seed: u64,

    // --- Bagging ---
    /// Row fraction per bag. `1.0` disables bagging.
    pub bagging_fraction: f64,
    /// Re-bag every this many iterations. `0` disables bagging.
    pub bagging_freq: usize,
    pub bagging_seed: u64,

    // --- Evaluation ---
    /// Metrics evaluated on every registered dataset.
    pub metric_types: Vec<MetricType>,
    /// Stop when no validation metric improved for this many iterations.
    /// `0` disables early stopping.
    pub early_stopping_round: usize,
    /// Metric output cadence, in iterations.
    pub output_freq: usize,
    /// Also evaluate metrics on the training data.
    pub is_training_metric: bool,

    // --- Objective parameters ---
    /// Sigmoid scale for the binary objective and its transform.
    pub sigmoid: f64,
    /// Relevance gain per label for ranking. Empty means `2^i - 1`.
    pub label_gain: Vec<f64>,
    /// NDCG truncation position for ranking.
    pub max_position: usize,
    /// Re-weight the rarer class in binary classification.
    pub is_unbalance: bool,

    // --- DART ---
    /// Per-tree drop probability.
    pub drop_rate: f64,
    pub dropping_seed: u64,

    // --- Tree learner ---
    pub tree: TreeConfig,

    // --- File paths ---
    pub data_path: Option<String>,
    pub valid_paths: Vec<String>,
    pub input_model: Option<String>,
    pub output_model: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task: Task::Train,
            objective: ObjectiveType::Regression,
            boosting_type: BoostingType::Gbdt,
            num_iterations: 100,
            learning_rate: 0.1,
            num_class: 1,
            num_threads: 0,
            max_bin: 255,
            bin_construct_sample_cnt: 50_000,
            is_enable_sparse: true,
            sparse_threshold: 0.8,
            data_random_seed: 1,
            bagging_fraction: 1.0,
            bagging_freq: 0,
            bagging_seed: 3,
            metric_types: Vec::new(),
            early_stopping_round: 0,
            output_freq: 1,
            is_training_metric: false,
            sigmoid: 1.0,
            label_gain: Vec::new(),
            max_position: 20,
            is_unbalance: false,
            drop_rate: 0.1,
            dropping_seed: 4,
            tree: TreeConfig::default(),
            data_path: None,
            valid_paths: Vec::new(),
            input_model: None,
            output_model: None,
        }
    }
}

/// Resolve a parameter alias to its canonical key.
fn resolve_alias(key: &str) -> &str {
    match key {
        "config" | "config_file" => "config",
        "num_trees" | "num_tree" | "num_round" | "num_rounds" | "num_iteration" => {
            "num_iterations"
        }
        "shrinkage_rate" => "learning_rate",
        "num_leaf" => "num_leaves",
        "num_classes" => "num_class",
        "train" | "train_data" | "training_data" => "data",
        "test" | "valid" | "test_data" => "valid_data",
        "is_sparse" | "enable_sparse" => "is_enable_sparse",
        "min_data_per_leaf" | "min_data" => "min_data_in_leaf",
        "min_sum_hessian_per_leaf" | "min_sum_hessian" | "min_hessian" => {
            "min_sum_hessian_in_leaf"
        }
        "sub_feature" | "colsample_bytree" => "feature_fraction",
        "sub_row" | "subsample" => "bagging_fraction",
        "subsample_freq" => "bagging_freq",
        "lambda" | "reg_lambda" => "lambda_l2",
        "num_thread" | "nthread" => "num_threads",
        "early_stopping_rounds" | "early_stopping" => "early_stopping_round",
        "metrics" | "metric_type" => "metric",
        "model_input" | "model_in" => "input_model",
        "model_output" | "model_out" => "output_model",
        "application" | "loss" => "objective",
        "boosting" | "boost" => "boosting_type",
        "ndcg_at" | "eval_at" => "max_position",
        other => other,
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("cannot parse {}={}", key, value)))
}

impl Config {
    /// Build a configuration from `key=value` pairs.
    ///
    /// Aliases are resolved first; unrecognized keys are logged and ignored.
    pub fn from_params<'a, I>(params: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Config::default();
        let mut seen: HashMap<String, String> = HashMap::new();
        for (raw_key, value) in params {
            let key = resolve_alias(raw_key.trim());
            let value = value.trim();
            if let Some(prev) = seen.insert(key.to_string(), value.to_string()) {
                if prev != value {
                    log::warn!("parameter {} set twice, keeping {}", key, value);
                }
            }
            config.apply(key, value)?;
        }
        config.check()?;
        Ok(config)
    }

    /// Build a configuration from a whitespace-separated `key=value` string.
    pub fn from_str_params(params: &str) -> Result<Self> {
        let pairs: Vec<(&str, &str)> = params
            .split_whitespace()
            .filter_map(|kv| kv.split_once('='))
            .collect();
        Self::from_params(pairs)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "task" => {
                self.task = match value {
                    "train" | "training" => Task::Train,
                    "predict" | "prediction" | "test" => Task::Predict,
                    _ => return Err(Error::Config(format!("unknown task: {}", value))),
                }
            }
            "objective" => {
                self.objective = match value {
                    "regression" | "regression_l2" | "mean_squared_error" | "mse" | "l2" => {
                        ObjectiveType::Regression
                    }
                    "binary" => ObjectiveType::Binary,
                    "multiclass" | "softmax" => ObjectiveType::Multiclass,
                    "lambdarank" => ObjectiveType::LambdaRank,
                    _ => return Err(Error::Config(format!("unknown objective: {}", value))),
                }
            }
            "boosting_type" => {
                self.boosting_type = match value {
                    "gbdt" | "gbrt" => BoostingType::Gbdt,
                    "dart" => BoostingType::Dart,
                    _ => {
                        return Err(Error::Config(format!("unknown boosting type: {}", value)))
                    }
                }
            }
            "num_iterations" => self.num_iterations = parse_value(key, value)?,
            "learning_rate" => self.learning_rate = parse_value(key, value)?,
            "num_class" => self.num_class = parse_value(key, value)?,
            "num_threads" => self.num_threads = parse_value(key, value)?,
            "max_bin" => self.max_bin = parse_value(key, value)?,
            "bin_construct_sample_cnt" => {
                self.bin_construct_sample_cnt = parse_value(key, value)?
            }
            "is_enable_sparse" => self.is_enable_sparse = parse_bool(value),
            "sparse_threshold" => self.sparse_threshold = parse_value(key, value)?,
            "data_random_seed" => self.data_random_seed = parse_value(key, value)?,
            "bagging_fraction" => self.bagging_fraction = parse_value(key, value)?,
            "bagging_freq" => self.bagging_freq = parse_value(key, value)?,
            "bagging_seed" => self.bagging_seed = parse_value(key, value)?,
            "early_stopping_round" => self.early_stopping_round = parse_value(key, value)?,
            "output_freq" => self.output_freq = parse_value(key, value)?,
            "is_training_metric" => self.is_training_metric = parse_bool(value),
            "sigmoid" => self.sigmoid = parse_value(key, value)?,
            "max_position" => self.max_position = parse_value(key, value)?,
            "is_unbalance" => self.is_unbalance = parse_bool(value),
            "drop_rate" => self.drop_rate = parse_value(key, value)?,
            "dropping_seed" => self.dropping_seed = parse_value(key, value)?,
            "num_leaves" => self.tree.num_leaves = parse_value(key, value)?,
            "min_data_in_leaf" => self.tree.min_data_in_leaf = parse_value(key, value)?,
            "min_sum_hessian_in_leaf" => {
                self.tree.min_sum_hessian_in_leaf = parse_value(key, value)?
            }
            "lambda_l2" => self.tree.lambda_l2 = parse_value(key, value)?,
            "feature_fraction" => self.tree.feature_fraction = parse_value(key, value)?,
            "feature_fraction_seed" => {
                self.tree.feature_fraction_seed = parse_value(key, value)?
            }
            "histogram_pool_size" => self.tree.histogram_pool_size = parse_value(key, value)?,
            "tree_learner" => {
                self.tree.tree_learner = match value {
                    "serial" => TreeLearnerType::Serial,
                    "feature" | "feature_parallel" => TreeLearnerType::Feature,
                    "data" | "data_parallel" => TreeLearnerType::Data,
                    _ => return Err(Error::Config(format!("unknown tree learner: {}", value))),
                }
            }
            "label_gain" => {
                self.label_gain = value
                    .split(',')
                    .map(|s| parse_value::<f64>(key, s))
                    .collect::<Result<_>>()?
            }
            "metric" => {
                self.metric_types = value
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(parse_metric)
                    .collect::<Result<_>>()?
            }
            "data" => self.data_path = Some(value.to_string()),
            "valid_data" => {
                self.valid_paths = value.split(',').map(|s| s.to_string()).collect()
            }
            "input_model" => self.input_model = Some(value.to_string()),
            "output_model" => self.output_model = Some(value.to_string()),
            _ => log::warn!("ignoring unknown parameter: {}={}", key, value),
        }
        Ok(())
    }

    /// Validate bounds. Called by the `from_*` constructors; call directly
    /// after building a `Config` by hand.
    pub fn check(&self) -> Result<()> {
        if self.learning_rate <= 0.0 {
            return Err(Error::Config("learning_rate must be positive".into()));
        }
        if self.max_bin < 2 || self.max_bin > 255 {
            return Err(Error::Config("max_bin must be in [2, 255]".into()));
        }
        if !(0.0 < self.bagging_fraction && self.bagging_fraction <= 1.0) {
            return Err(Error::Config("bagging_fraction must be in (0, 1]".into()));
        }
        if !(0.0 < self.tree.feature_fraction && self.tree.feature_fraction <= 1.0) {
            return Err(Error::Config("feature_fraction must be in (0, 1]".into()));
        }
        if self.tree.num_leaves < 2 {
            return Err(Error::Config("num_leaves must be at least 2".into()));
        }
        if self.tree.lambda_l2 < 0.0 {
            return Err(Error::Config("lambda_l2 must be non-negative".into()));
        }
        if self.objective == ObjectiveType::Multiclass && self.num_class < 2 {
            return Err(Error::Config(
                "multiclass objective requires num_class >= 2".into(),
            ));
        }
        if self.objective != ObjectiveType::Multiclass && self.num_class != 1 {
            return Err(Error::Config(
                "num_class > 1 is only valid for the multiclass objective".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.drop_rate) {
            return Err(Error::Config("drop_rate must be in [0, 1)".into()));
        }
        if self.output_freq == 0 {
            return Err(Error::Config("output_freq must be positive".into()));
        }
        Ok(())
    }

    /// Number of trees trained per boosting iteration.
    pub fn num_tree_per_iteration(&self) -> usize {
        if self.objective == ObjectiveType::Multiclass {
            self.num_class
        } else {
            1
        }
    }

    /// Metrics to use, falling back to the objective's natural default.
    pub fn effective_metrics(&self) -> Vec<MetricType> {
        if !self.metric_types.is_empty() {
            return self.metric_types.clone();
        }
        match self.objective {
            ObjectiveType::Regression => vec![MetricType::L2],
            ObjectiveType::Binary => vec![MetricType::BinaryLogloss],
            ObjectiveType::Multiclass => vec![MetricType::MulticlassLogloss],
            ObjectiveType::LambdaRank => vec![MetricType::Ndcg],
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "true" | "True" | "1" | "yes" | "on" | "+")
}

fn parse_metric(name: &str) -> Result<MetricType> {
    Ok(match name.trim() {
        "l1" | "mae" | "mean_absolute_error" => MetricType::L1,
        "l2" | "mse" | "mean_squared_error" => MetricType::L2,
        "binary_logloss" | "logloss" => MetricType::BinaryLogloss,
        "binary_error" | "error" => MetricType::BinaryError,
        "multi_logloss" | "multiclass_logloss" => MetricType::MulticlassLogloss,
        "multi_error" | "multiclass_error" => MetricType::MulticlassError,
        "ndcg" => MetricType::Ndcg,
        other => return Err(Error::Config(format!("unknown metric: {}", other))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tree.num_leaves, 127);
        assert_eq!(config.max_bin, 255);
        assert!(config.is_enable_sparse);
        assert_eq!(config.num_tree_per_iteration(), 1);
    }

    #[test]
    fn test_alias_resolution() {
        let config =
            Config::from_str_params("num_tree=50 sub_feature=0.5 num_leaf=31 min_data=5")
                .unwrap();
        assert_eq!(config.num_iterations, 50);
        assert!((config.tree.feature_fraction - 0.5).abs() < 1e-12);
        assert_eq!(config.tree.num_leaves, 31);
        assert_eq!(config.tree.min_data_in_leaf, 5);
    }

    #[rstest::rstest]
    #[case("num_round=7", 7)]
    #[case("num_rounds=8", 8)]
    #[case("num_iteration=9", 9)]
    #[case("num_trees=11", 11)]
    fn test_iteration_aliases(#[case] params: &str, #[case] expected: usize) {
        let config = Config::from_str_params(params).unwrap();
        assert_eq!(config.num_iterations, expected);
    }

    #[test]
    fn test_metric_list() {
        let config = Config::from_str_params("metric=l2,l1").unwrap();
        assert_eq!(config.metric_types, vec![MetricType::L2, MetricType::L1]);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        assert!(Config::from_str_params("learning_rate=0").is_err());
        assert!(Config::from_str_params("bagging_fraction=1.5").is_err());
        assert!(Config::from_str_params("max_bin=1000").is_err());
        assert!(Config::from_str_params("objective=multiclass").is_err());
    }

    #[test]
    fn test_default_metric_follows_objective() {
        let config = Config::from_str_params("objective=binary").unwrap();
        assert_eq!(config.effective_metrics(), vec![MetricType::BinaryLogloss]);
    }

    #[test]
    fn test_multiclass_tree_count() {
        let config = Config::from_str_params("objective=multiclass num_class=3").unwrap();
        assert_eq!(config.num_tree_per_iteration(), 3);
    }
}
