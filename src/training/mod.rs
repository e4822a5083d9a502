//! Training core: data partition, histograms, split finding, the tree
//! learner and score tracking.

mod histogram;
mod learner;
mod partition;
mod score;
mod split;

pub use histogram::{construct_histograms, subtract_histogram, HistogramEntry, HistogramPool};
pub use learner::SerialTreeLearner;
pub use partition::DataPartition;
pub use score::ScoreUpdater;
pub use split::{SplitEvaluator, SplitInfo};
