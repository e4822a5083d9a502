//! leafboost: histogram-based gradient boosted decision trees.
//!
//! Training follows the classic histogram design: feature values are
//! pre-discretized into at most 255 bins, trees grow leaf-wise over a cached
//! row partition, sibling histograms are derived by subtraction, and an
//! outer boosting loop (GBDT or DART) drives per-class tree learners with
//! bagging, shrinkage and metric-driven early stopping.
//!
//! # Example
//!
//! ```ignore
//! use leafboost::{create_boosting, Config, DatasetBuilder};
//!
//! let config = Config::from_str_params("objective=binary num_iterations=50")?;
//! let train = DatasetBuilder::new(&config).from_array(values.view(), &labels)?;
//! let mut booster = create_boosting(&config, &train)?;
//! booster.train()?;
//! let p = booster.predict(&row);
//! ```

pub mod boosting;
pub mod config;
pub mod data;
pub mod error;
pub mod metric;
pub mod objective;
pub mod training;
pub mod tree;

pub use boosting::{create_boosting, Boosting, Dart, Gbdt, LoadedModel};
pub use config::{BoostingType, Config, MetricType, ObjectiveType, Task, TreeConfig};
pub use data::{load_from_file, BinMapper, Dataset, DatasetBuilder, Metadata};
pub use error::{Error, Result};
pub use metric::{create_metric, create_metrics, Metric};
pub use objective::{create_objective, ObjectiveFunction};
pub use tree::Tree;
