//! Serial leaf-wise tree learner.
//!
//! Grows one tree per call to [`SerialTreeLearner::train`]. Growth always
//! expands the leaf with the highest pending split gain, bounded by
//! `num_leaves`. Histograms are built directly only for the smaller child of
//! each split; the larger child is derived from the parent by subtraction
//! through the LRU histogram pool, which halves histogram work in
//! expectation.
//!
//! The learner owns the per-tree mutable state: the row partition, the
//! ordered views of sparse features, the split mask, the candidate splits
//! per leaf, and the per-tree feature sample.

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

use crate::config::TreeConfig;
use crate::data::{BinStorage, BinType, Dataset, OrderedSparseBin};
use crate::training::histogram::{construct_histograms, HistogramPool};
use crate::training::partition::DataPartition;
use crate::training::split::{SplitEvaluator, SplitInfo};
use crate::tree::Tree;

/// Rows per chunk for deterministic parallel gradient sums.
const SUM_CHUNK_SIZE: usize = 4096;

/// Gradient/hessian sums and row count of one active leaf.
#[derive(Clone, Copy, Debug, Default)]
struct LeafStats {
    sum_grad: f64,
    sum_hess: f64,
}

/// Histogram-based leaf-wise tree learner.
pub struct SerialTreeLearner {
    config: TreeConfig,
    num_data: usize,
    num_features: usize,
    evaluator: SplitEvaluator,
    partition: DataPartition,
    histogram_pool: HistogramPool,
    /// Pending best split for each active leaf.
    best_split_per_leaf: Vec<SplitInfo>,
    leaf_stats: Vec<LeafStats>,
    /// Ordered views for sparse features, indexed like the dataset features.
    ordered_bins: Vec<Option<OrderedSparseBin>>,
    has_ordered_bin: bool,
    /// Features considered by the finder for the current tree.
    is_feature_used: Vec<bool>,
    feature_rng: Xoshiro256PlusPlus,
    /// Current bag, or `None` when training on all rows.
    bag_indices: Option<Vec<u32>>,
    /// Row-in-bag mask, maintained alongside `bag_indices`.
    bag_mask: Vec<bool>,
    /// Split decision per row, shared by the partition and the sparse bins.
    goes_left: Vec<bool>,
}

impl SerialTreeLearner {
    pub fn new(dataset: &Dataset, config: &TreeConfig) -> Self {
        let num_data = dataset.num_data();
        let num_features = dataset.num_features();
        let num_leaves = config.num_leaves;

        let ordered_bins: Vec<Option<OrderedSparseBin>> = dataset
            .features()
            .iter()
            .map(|f| match f.storage() {
                BinStorage::Sparse(_) => Some(OrderedSparseBin::new(num_leaves)),
                BinStorage::Dense(_) => None,
            })
            .collect();
        let has_ordered_bin = ordered_bins.iter().any(Option::is_some);

        Self {
            evaluator: SplitEvaluator {
                lambda_l2: config.lambda_l2,
                min_data_in_leaf: config.min_data_in_leaf as u32,
                min_sum_hessian_in_leaf: config.min_sum_hessian_in_leaf,
            },
            partition: DataPartition::new(num_data, num_leaves),
            histogram_pool: HistogramPool::new(
                &dataset.bin_counts(),
                config.histogram_pool_size,
                num_leaves,
            ),
            best_split_per_leaf: vec![SplitInfo::default(); num_leaves],
            leaf_stats: vec![LeafStats::default(); num_leaves],
            ordered_bins,
            has_ordered_bin,
            is_feature_used: vec![true; num_features],
            feature_rng: Xoshiro256PlusPlus::seed_from_u64(config.feature_fraction_seed),
            bag_indices: None,
            bag_mask: vec![true; num_data],
            goes_left: vec![false; num_data],
            config: config.clone(),
            num_data,
            num_features,
        }
    }

    /// Restrict the next trees to a row bag. `None` trains on all rows.
    pub fn set_bagging_data(&mut self, bag: Option<&[u32]>) {
        match bag {
            None => {
                self.bag_indices = None;
                self.bag_mask.fill(true);
            }
            Some(indices) => {
                self.bag_mask.fill(false);
                for &row in indices {
                    self.bag_mask[row as usize] = true;
                }
                self.bag_indices = Some(indices.to_vec());
            }
        }
    }

    /// Grow one tree from the given gradients and hessians (indexed by row).
    pub fn train(&mut self, dataset: &Dataset, gradients: &[f32], hessians: &[f32]) -> Tree {
        assert_eq!(gradients.len(), self.num_data);
        assert_eq!(hessians.len(), self.num_data);

        self.init_for_tree(dataset, gradients, hessians);

        let mut tree = Tree::new(self.config.num_leaves);
        for _ in 0..self.config.num_leaves - 1 {
            let Some(best_leaf) = self.choose_split_leaf(tree.num_leaves()) else {
                break;
            };
            self.split_leaf(dataset, &mut tree, best_leaf, gradients, hessians);
        }
        tree
    }

    /// Add the last tree's committed leaf outputs to `score` for the rows
    /// that trained it. O(bag) via the partition's final leaf assignment.
    pub fn add_prediction_to_score(&self, tree: &Tree, score: &mut [f64]) {
        for leaf in 0..tree.num_leaves() {
            let output = tree.leaf_value(leaf);
            for &row in self.partition.leaf_indices(leaf) {
                score[row as usize] += output;
            }
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    fn init_for_tree(&mut self, dataset: &Dataset, gradients: &[f32], hessians: &[f32]) {
        self.partition.init(self.num_data, self.bag_indices.as_deref());
        self.histogram_pool.reset_map();
        for split in &mut self.best_split_per_leaf {
            *split = SplitInfo::default();
        }
        for stats in &mut self.leaf_stats {
            *stats = LeafStats::default();
        }
        self.sample_features();

        // Re-group sparse features for the new bag.
        if self.has_ordered_bin {
            let bag_mask = self.bag_indices.as_ref().map(|_| self.bag_mask.as_slice());
            let features = dataset.features();
            self.ordered_bins
                .par_iter_mut()
                .enumerate()
                .for_each(|(f, ordered)| {
                    if let Some(ordered) = ordered {
                        let BinStorage::Sparse(sparse) = features[f].storage() else {
                            unreachable!("ordered bin on dense feature");
                        };
                        ordered.init(sparse, bag_mask);
                    }
                });
        }

        // Root statistics and histogram.
        let root_indices = self.partition.leaf_indices(0);
        let (sum_grad, sum_hess) = sum_gradients(root_indices, gradients, hessians);
        self.leaf_stats[0] = LeafStats { sum_grad, sum_hess };
        self.build_histogram(dataset, 0, gradients, hessians);
        self.find_best_split(dataset, 0);
    }

    /// Seeded per-tree feature subset of size
    /// `ceil(feature_fraction * num_features)`.
    fn sample_features(&mut self) {
        if self.config.feature_fraction >= 1.0 {
            self.is_feature_used.fill(true);
            return;
        }
        let used = ((self.config.feature_fraction * self.num_features as f64).ceil() as usize)
            .clamp(1, self.num_features);
        self.is_feature_used.fill(false);
        let chosen =
            rand::seq::index::sample(&mut self.feature_rng, self.num_features, used);
        for f in chosen {
            self.is_feature_used[f] = true;
        }
    }

    // =========================================================================
    // Growth
    // =========================================================================

    /// Leaf with the highest pending gain, if any gain is positive.
    fn choose_split_leaf(&self, num_leaves: usize) -> Option<usize> {
        let mut best_leaf = None;
        let mut best_gain = 0.0;
        for leaf in 0..num_leaves {
            let gain = self.best_split_per_leaf[leaf].gain;
            if gain > best_gain {
                best_gain = gain;
                best_leaf = Some(leaf);
            }
        }
        best_leaf
    }

    fn split_leaf(
        &mut self,
        dataset: &Dataset,
        tree: &mut Tree,
        leaf: usize,
        gradients: &[f32],
        hessians: &[f32],
    ) {
        let split = self.best_split_per_leaf[leaf].clone();
        debug_assert!(split.feature >= 0);
        let feature = dataset.feature(split.feature as usize);

        // Same left/right decision for the partition and every sparse bin.
        self.compute_split_mask(dataset, leaf, &split);

        let right_leaf = tree.split(
            leaf,
            split.feature,
            feature.real_index() as i32,
            split.threshold_bin,
            feature.mapper().bin_to_value(split.threshold_bin),
            split.is_categorical,
            split.gain,
            split.left_output,
            split.right_output,
            split.left_count,
            split.right_count,
        );

        let (left_count, right_count) =
            self.partition.split(leaf, right_leaf, &self.goes_left);
        debug_assert_eq!(left_count as u32, split.left_count);
        debug_assert_eq!(right_count as u32, split.right_count);

        if self.has_ordered_bin {
            let goes_left = &self.goes_left;
            self.ordered_bins
                .par_iter_mut()
                .for_each(|ordered| {
                    if let Some(ordered) = ordered {
                        ordered.split(leaf, right_leaf, goes_left);
                    }
                });
        }

        self.leaf_stats[leaf] = LeafStats {
            sum_grad: split.left_sum_grad,
            sum_hess: split.left_sum_hess,
        };
        self.leaf_stats[right_leaf] = LeafStats {
            sum_grad: split.right_sum_grad,
            sum_hess: split.right_sum_hess,
        };

        // Subtraction trick: build the smaller child directly, derive the
        // larger child as parent minus smaller. The parent's histogram sits
        // in `leaf`'s slot.
        let (small, large) = if left_count <= right_count {
            (leaf, right_leaf)
        } else {
            (right_leaf, leaf)
        };
        let parent_resident = self.histogram_pool.is_resident(leaf);
        self.histogram_pool.move_to(leaf, large);

        let small_slot = self.build_histogram(dataset, small, gradients, hessians);
        if parent_resident {
            let large_slot = self.histogram_pool.acquire(large).slot;
            self.histogram_pool.subtract(large_slot, small_slot);
        } else {
            // Parent was evicted; rebuild the larger child from scratch.
            self.build_histogram(dataset, large, gradients, hessians);
        }

        self.find_best_split(dataset, leaf);
        self.find_best_split(dataset, right_leaf);
    }

    /// Fill `goes_left` for every row of `leaf`.
    fn compute_split_mask(&mut self, dataset: &Dataset, leaf: usize, split: &SplitInfo) {
        let feature = dataset.feature(split.feature as usize);
        match feature.storage() {
            BinStorage::Dense(dense) => {
                for &row in self.partition.leaf_indices(leaf) {
                    self.goes_left[row as usize] = split.goes_left(dense.get(row as usize));
                }
            }
            BinStorage::Sparse(_) => {
                // Zero rows take the zero-bin decision; non-zero rows come
                // from the ordered view of this leaf.
                let default_left = split.goes_left(0);
                for &row in self.partition.leaf_indices(leaf) {
                    self.goes_left[row as usize] = default_left;
                }
                let ordered = self.ordered_bins[split.feature as usize]
                    .as_ref()
                    .expect("sparse feature without ordered bin");
                for &(row, bin) in ordered.leaf_pairs(leaf) {
                    self.goes_left[row as usize] = split.goes_left(bin as u32);
                }
            }
        }
    }

    /// Build `leaf`'s histogram set; returns its pool slot.
    fn build_histogram(
        &mut self,
        dataset: &Dataset,
        leaf: usize,
        gradients: &[f32],
        hessians: &[f32],
    ) -> usize {
        let acquired = self.histogram_pool.acquire(leaf);
        let stats = self.leaf_stats[leaf];
        let offsets = self.histogram_pool.offsets().to_vec();
        construct_histograms(
            self.histogram_pool.slot_mut(acquired.slot),
            &offsets,
            dataset.features(),
            &self.is_feature_used,
            self.partition.leaf_indices(leaf),
            &self.ordered_bins,
            leaf,
            stats.sum_grad,
            stats.sum_hess,
            gradients,
            hessians,
        );
        acquired.slot
    }

    /// Scan the leaf's histograms and record its best pending split.
    fn find_best_split(&mut self, dataset: &Dataset, leaf: usize) {
        let acquired = self.histogram_pool.acquire(leaf);
        debug_assert!(acquired.hit);
        let stats = self.leaf_stats[leaf];
        let total_count = self.partition.leaf_count(leaf) as u32;

        let mut best = SplitInfo::default();
        for f in 0..self.num_features {
            if !self.is_feature_used[f] {
                continue;
            }
            let histogram = self.histogram_pool.feature_histogram(acquired.slot, f);
            match dataset.feature(f).mapper().bin_type() {
                BinType::Numerical => self.evaluator.find_best_threshold_numerical(
                    f as i32,
                    histogram,
                    stats.sum_grad,
                    stats.sum_hess,
                    total_count,
                    &mut best,
                ),
                BinType::Categorical => self.evaluator.find_best_threshold_categorical(
                    f as i32,
                    histogram,
                    stats.sum_grad,
                    stats.sum_hess,
                    total_count,
                    &mut best,
                ),
            }
        }
        self.best_split_per_leaf[leaf] = best;
    }
}

/// Deterministic parallel gradient/hessian sum over a set of rows.
///
/// Fixed-size chunks are reduced in order, so the result does not depend on
/// the number of worker threads.
fn sum_gradients(rows: &[u32], gradients: &[f32], hessians: &[f32]) -> (f64, f64) {
    let partials: Vec<(f64, f64)> = rows
        .par_chunks(SUM_CHUNK_SIZE)
        .map(|chunk| {
            let mut sum_grad = 0.0f64;
            let mut sum_hess = 0.0f64;
            for &row in chunk {
                sum_grad += gradients[row as usize] as f64;
                sum_hess += hessians[row as usize] as f64;
            }
            (sum_grad, sum_hess)
        })
        .collect();
    partials
        .into_iter()
        .fold((0.0, 0.0), |(g, h), (pg, ph)| (g + pg, h + ph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::data::DatasetBuilder;
    use ndarray::Array2;

    fn small_tree_config() -> TreeConfig {
        TreeConfig {
            num_leaves: 4,
            min_data_in_leaf: 1,
            min_sum_hessian_in_leaf: 0.0,
            ..TreeConfig::default()
        }
    }

    fn step_dataset() -> Dataset {
        // Feature 0 separates the first half from the second half.
        let values = Array2::from_shape_fn((8, 1), |(i, _)| (i / 4) as f64);
        let label: Vec<f32> = (0..8).map(|i| (i / 4) as f32).collect();
        DatasetBuilder::new(&Config::default())
            .from_array(values.view(), &label)
            .unwrap()
    }

    #[test]
    fn test_single_split_on_step_gradient() {
        let dataset = step_dataset();
        let mut learner = SerialTreeLearner::new(&dataset, &small_tree_config());

        let gradients: Vec<f32> = (0..8).map(|i| if i < 4 { 1.0 } else { -1.0 }).collect();
        let hessians = vec![1.0f32; 8];
        let tree = learner.train(&dataset, &gradients, &hessians);

        assert_eq!(tree.num_leaves(), 2);
        // Leaves carry opposite-signed outputs.
        assert!(tree.leaf_value(0) < 0.0);
        assert!(tree.leaf_value(1) > 0.0);
        assert_eq!(tree.leaf_count(0), 4);
        assert_eq!(tree.leaf_count(1), 4);
    }

    #[test]
    fn test_constant_gradient_yields_stump() {
        let dataset = step_dataset();
        let mut learner = SerialTreeLearner::new(&dataset, &small_tree_config());

        let gradients = vec![1.0f32; 8];
        let hessians = vec![1.0f32; 8];
        let tree = learner.train(&dataset, &gradients, &hessians);
        assert_eq!(tree.num_leaves(), 1);
    }

    #[test]
    fn test_num_leaves_bound_respected() {
        // 16 rows over a feature with 16 distinct values and alternating
        // gradients: plenty of split opportunities.
        let values = Array2::from_shape_fn((16, 1), |(i, _)| i as f64);
        let label = vec![0.0f32; 16];
        let dataset = DatasetBuilder::new(&Config::default())
            .from_array(values.view(), &label)
            .unwrap();

        let mut config = small_tree_config();
        config.num_leaves = 3;
        let mut learner = SerialTreeLearner::new(&dataset, &config);

        let gradients: Vec<f32> = (0..16).map(|i| if i % 4 < 2 { 1.0 } else { -1.0 }).collect();
        let hessians = vec![1.0f32; 16];
        let tree = learner.train(&dataset, &gradients, &hessians);
        assert!(tree.num_leaves() <= 3);
        assert!(tree.num_leaves() > 1);
    }

    #[test]
    fn test_min_data_in_leaf_enforced() {
        let dataset = step_dataset();
        let mut config = small_tree_config();
        config.min_data_in_leaf = 5;
        let mut learner = SerialTreeLearner::new(&dataset, &config);

        let gradients: Vec<f32> = (0..8).map(|i| if i < 4 { 1.0 } else { -1.0 }).collect();
        let hessians = vec![1.0f32; 8];
        // Any split would create 4-row children; with min_data_in_leaf = 5
        // the tree cannot grow.
        let tree = learner.train(&dataset, &gradients, &hessians);
        assert_eq!(tree.num_leaves(), 1);
    }

    #[test]
    fn test_bagging_restricts_rows() {
        let dataset = step_dataset();
        let mut learner = SerialTreeLearner::new(&dataset, &small_tree_config());
        let bag: Vec<u32> = vec![0, 1, 4, 5];
        learner.set_bagging_data(Some(&bag));

        let gradients: Vec<f32> = (0..8).map(|i| if i < 4 { 1.0 } else { -1.0 }).collect();
        let hessians = vec![1.0f32; 8];
        let tree = learner.train(&dataset, &gradients, &hessians);

        assert_eq!(tree.num_leaves(), 2);
        assert_eq!(tree.leaf_count(0) + tree.leaf_count(1), 4);
    }

    #[test]
    fn test_add_prediction_to_score_matches_leaf_ranges() {
        let dataset = step_dataset();
        let mut learner = SerialTreeLearner::new(&dataset, &small_tree_config());

        let gradients: Vec<f32> = (0..8).map(|i| if i < 4 { 1.0 } else { -1.0 }).collect();
        let hessians = vec![1.0f32; 8];
        let tree = learner.train(&dataset, &gradients, &hessians);

        let mut score = vec![0.0f64; 8];
        learner.add_prediction_to_score(&tree, &mut score);
        for i in 0..8 {
            let expected = if i < 4 {
                tree.leaf_value(0)
            } else {
                tree.leaf_value(1)
            };
            assert!((score[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_sibling_subtraction_identity() {
        // Two features so the root histogram of feature 1 can be compared
        // against the sum of its children's histograms.
        let values = Array2::from_shape_fn((64, 2), |(i, j)| {
            if j == 0 {
                (i % 8) as f64
            } else {
                (i % 5) as f64
            }
        });
        let label = vec![0.0f32; 64];
        let dataset = DatasetBuilder::new(&Config::default())
            .from_array(values.view(), &label)
            .unwrap();

        let mut config = small_tree_config();
        config.num_leaves = 2;
        let mut learner = SerialTreeLearner::new(&dataset, &config);

        let gradients: Vec<f32> = (0..64).map(|i| ((i % 8) as f32) - 3.5).collect();
        let hessians = vec![1.0f32; 64];
        let _tree = learner.train(&dataset, &gradients, &hessians);

        // After the single split, leaves 0 and 1 hold the children. Rebuild
        // both children's histograms from scratch and compare their sum with
        // a root rebuild.
        let root_rows: Vec<u32> = (0..64).collect();
        let left_rows: Vec<u32> = learner.partition.leaf_indices(0).to_vec();
        let right_rows: Vec<u32> = learner.partition.leaf_indices(1).to_vec();
        assert_eq!(left_rows.len() + right_rows.len(), 64);

        for f in 0..2 {
            let bins = dataset.feature(f).num_bins();
            let mut parent = vec![crate::training::HistogramEntry::default(); bins];
            let mut left = parent.clone();
            let mut right = parent.clone();
            if let BinStorage::Dense(dense) = dataset.feature(f).storage() {
                dense.construct_histogram(&root_rows, &gradients, &hessians, &mut parent);
                dense.construct_histogram(&left_rows, &gradients, &hessians, &mut left);
                dense.construct_histogram(&right_rows, &gradients, &hessians, &mut right);
            }
            for b in 0..bins {
                let sum = left[b].sum_grad + right[b].sum_grad;
                assert!((parent[b].sum_grad - sum).abs() < 1e-9);
                assert_eq!(parent[b].count, left[b].count + right[b].count);
            }
        }
    }

    #[test]
    fn test_feature_fraction_uses_subset() {
        let values = Array2::from_shape_fn((32, 4), |(i, j)| ((i + j) % 7) as f64);
        let label = vec![0.0f32; 32];
        let dataset = DatasetBuilder::new(&Config::default())
            .from_array(values.view(), &label)
            .unwrap();

        let mut config = small_tree_config();
        config.feature_fraction = 0.5;
        let mut learner = SerialTreeLearner::new(&dataset, &config);

        let gradients: Vec<f32> = (0..32).map(|i| ((i % 7) as f32) - 3.0).collect();
        let hessians = vec![1.0f32; 32];
        let _tree = learner.train(&dataset, &gradients, &hessians);
        let used = learner.is_feature_used.iter().filter(|&&u| u).count();
        assert_eq!(used, 2);
    }
}
