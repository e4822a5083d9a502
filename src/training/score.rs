//! Score tracking for one dataset registered with the boosting controller.

use crate::data::Dataset;
use crate::training::learner::SerialTreeLearner;
use crate::tree::Tree;

/// Class-major score buffer: the score of class `k` for row `i` lives at
/// `k * num_data + i`. Seeded from the dataset's initial scores when present,
/// then accumulated tree by tree for the boosting lifetime.
pub struct ScoreUpdater {
    score: Vec<f64>,
    num_data: usize,
}

impl ScoreUpdater {
    pub fn new(dataset: &Dataset, num_class: usize) -> Self {
        let num_data = dataset.num_data();
        let score = match dataset.metadata().init_score() {
            Some(init) if init.len() == num_data * num_class => init.to_vec(),
            Some(init) => {
                log::warn!(
                    "ignoring init score of length {} (expected {})",
                    init.len(),
                    num_data * num_class
                );
                vec![0.0; num_data * num_class]
            }
            None => vec![0.0; num_data * num_class],
        };
        Self { score, num_data }
    }

    #[inline]
    pub fn num_data(&self) -> usize {
        self.num_data
    }

    #[inline]
    pub fn score(&self) -> &[f64] {
        &self.score
    }

    /// Add a tree's outputs for every row, via binned traversal.
    pub fn add_score_tree(&mut self, tree: &Tree, dataset: &Dataset, class: usize) {
        let offset = class * self.num_data;
        tree.add_prediction_to_score(
            dataset,
            None,
            &mut self.score[offset..offset + self.num_data],
        );
    }

    /// Add a tree's outputs for a subset of rows (ascending), via binned
    /// traversal. Used for out-of-bag rows.
    pub fn add_score_subset(
        &mut self,
        tree: &Tree,
        dataset: &Dataset,
        rows: &[u32],
        class: usize,
    ) {
        let offset = class * self.num_data;
        tree.add_prediction_to_score(
            dataset,
            Some(rows),
            &mut self.score[offset..offset + self.num_data],
        );
    }

    /// Add the last trained tree's outputs for its in-bag rows using the
    /// learner's cached leaf membership. O(bag) instead of a traversal.
    pub fn add_score_learner(
        &mut self,
        learner: &SerialTreeLearner,
        tree: &Tree,
        class: usize,
    ) {
        let offset = class * self.num_data;
        learner.add_prediction_to_score(
            tree,
            &mut self.score[offset..offset + self.num_data],
        );
    }
}
