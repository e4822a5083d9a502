//! DART boosting controller.
//!
//! Dropouts meet Multiple Additive Regression Trees: before each iteration a
//! random subset of previously accepted trees is dropped and their
//! contribution removed from the training score, so the gradients see the
//! reduced ensemble. The new tree is trained with shrinkage
//! `1 / (|dropped| + 1)`, and afterwards the dropped trees are restored
//! down-weighted so the total training-score change stays consistent.

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::boosting::gbdt::Gbdt;
use crate::boosting::Boosting;
use crate::config::{BoostingType, Config};
use crate::data::Dataset;
use crate::error::Result;

const DROP_RATE_EPSILON: f64 = 1e-15;

/// DART controller, layered over [`Gbdt`].
pub struct Dart<'a> {
    gbdt: Gbdt<'a>,
    drop_rate: f64,
    /// Iterations dropped for the current round.
    drop_indices: Vec<usize>,
    shrinkage_rate: f64,
    drop_rng: Xoshiro256PlusPlus,
}

impl<'a> Dart<'a> {
    pub fn new(config: &Config, train_data: &'a Dataset) -> Result<Self> {
        Ok(Self {
            gbdt: Gbdt::new(config, train_data)?,
            drop_rate: config.drop_rate,
            drop_indices: Vec::new(),
            shrinkage_rate: 1.0,
            drop_rng: Xoshiro256PlusPlus::seed_from_u64(config.dropping_seed),
        })
    }

    fn train_dart_loop(&mut self) -> Result<()> {
        while self.gbdt.iter < self.gbdt.config.num_iterations {
            if self.train_one_iter(None, None, true)? {
                break;
            }
        }
        if let Some(path) = self.gbdt.config.output_model.clone() {
            self.save_model(&path)?;
        }
        Ok(())
    }

    /// Select the iterations to drop and remove their trees' contribution
    /// from the training score. At least one tree is dropped once any exist.
    fn dropping_trees(&mut self) {
        self.drop_indices.clear();
        // Complete iterations actually present in the model list (early
        // stopping may have popped trees).
        let completed = self.gbdt.models.len() / self.gbdt.num_class;
        if self.drop_rate > DROP_RATE_EPSILON {
            for i in 0..completed {
                if self.drop_rng.gen::<f64>() < self.drop_rate {
                    self.drop_indices.push(i);
                }
            }
        }
        if self.drop_indices.is_empty() && completed > 0 {
            self.drop_indices.push(self.drop_rng.gen_range(0..completed));
        }

        let num_class = self.gbdt.num_class;
        for &iteration in &self.drop_indices {
            for k in 0..num_class {
                let tree_idx = iteration * num_class + k;
                // Negate, then add: the training score loses the tree.
                self.gbdt.models[tree_idx].shrinkage(-1.0);
                let tree = &self.gbdt.models[tree_idx];
                self.gbdt
                    .train_score
                    .add_score_tree(tree, self.gbdt.train_data, k);
            }
        }
        self.shrinkage_rate = 1.0 / (1.0 + self.drop_indices.len() as f64);
    }

    /// Undo a drop without re-weighting. Used when the iteration aborts
    /// before `normalize` (no tree could be trained), so the stored trees
    /// and the training score stay consistent.
    fn restore_dropped(&mut self) {
        let num_class = self.gbdt.num_class;
        for &iteration in &self.drop_indices {
            for k in 0..num_class {
                let tree_idx = iteration * num_class + k;
                self.gbdt.models[tree_idx].shrinkage(-1.0);
                let tree = &self.gbdt.models[tree_idx];
                self.gbdt
                    .train_score
                    .add_score_tree(tree, self.gbdt.train_data, k);
            }
        }
        self.drop_indices.clear();
        self.shrinkage_rate = 1.0;
    }

    /// Restore the dropped trees, down-weighted by `k/(k+1)`, fixing up the
    /// training and validation scores so every buffer again equals the sum
    /// of the stored trees' contributions.
    fn normalize(&mut self) {
        let k = self.drop_indices.len() as f64;
        let num_class = self.gbdt.num_class;
        for &iteration in &self.drop_indices {
            for class in 0..num_class {
                let tree_idx = iteration * num_class + class;
                // Values are currently negated: scale to -v/(k+1) and let
                // the validation buffers absorb the reduction.
                self.gbdt.models[tree_idx].shrinkage(self.shrinkage_rate);
                for i in 0..self.gbdt.valid_score.len() {
                    let tree = &self.gbdt.models[tree_idx];
                    self.gbdt.valid_score[i].add_score_tree(
                        tree,
                        self.gbdt.valid_data[i],
                        class,
                    );
                }
                // Back to positive v·k/(k+1); the training buffer regains
                // the down-weighted contribution.
                self.gbdt.models[tree_idx].shrinkage(-k);
                let tree = &self.gbdt.models[tree_idx];
                self.gbdt
                    .train_score
                    .add_score_tree(tree, self.gbdt.train_data, class);
            }
        }
    }
}

impl<'a> Boosting<'a> for Dart<'a> {
    fn add_valid_data(&mut self, data: &'a Dataset) -> Result<()> {
        self.gbdt.add_valid_data(data)
    }

    fn train(&mut self) -> Result<()> {
        let num_threads = self.gbdt.config.num_threads;
        if num_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
                .map_err(|e| {
                    crate::error::Error::Config(format!("cannot build thread pool: {}", e))
                })?;
            pool.install(|| self.train_dart_loop())
        } else {
            self.train_dart_loop()
        }
    }

    fn train_one_iter(
        &mut self,
        gradients: Option<&[f32]>,
        hessians: Option<&[f32]>,
        is_eval: bool,
    ) -> Result<bool> {
        // Drop first, so the gradients see the reduced ensemble.
        self.dropping_trees();
        match (gradients, hessians) {
            (Some(g), Some(h)) => self.gbdt.set_custom_gradients(g, h)?,
            (None, None) => self.gbdt.boosting(),
            _ => {
                return Err(crate::error::Error::Config(
                    "gradients and hessians must be supplied together".into(),
                ))
            }
        }
        self.gbdt.bagging(self.gbdt.iter);

        for k in 0..self.gbdt.num_class {
            let Some(mut tree) = self.gbdt.train_tree_for_class(k) else {
                log::info!("stopped training: no leaf meets the split requirements");
                self.restore_dropped();
                return Ok(true);
            };
            tree.shrinkage(self.shrinkage_rate);
            self.gbdt.update_score(&tree, k);
            self.gbdt.models.push(tree);
        }

        self.normalize();

        Ok(self.gbdt.finish_iteration(is_eval))
    }

    fn eval_at(&self, data_idx: usize) -> Vec<f64> {
        self.gbdt.eval_at(data_idx)
    }

    fn score_of(&self, data_idx: usize) -> &[f64] {
        self.gbdt.score_of(data_idx)
    }

    fn predict_of(&self, data_idx: usize) -> Vec<f64> {
        self.gbdt.predict_of(data_idx)
    }

    fn num_iterations_trained(&self) -> usize {
        self.gbdt.num_iterations_trained()
    }

    fn save_model(&self, path: &str) -> Result<()> {
        self.gbdt.save_model(path)
    }

    fn to_model_string(&self) -> String {
        self.gbdt.to_model_string()
    }

    fn models_from_string(&mut self, text: &str) -> Result<()> {
        self.gbdt.models_from_string(text)
    }

    fn predict_raw(&self, features: &[f64]) -> Vec<f64> {
        self.gbdt.predict_raw(features)
    }

    fn predict(&self, features: &[f64]) -> Vec<f64> {
        self.gbdt.predict(features)
    }

    fn predict_leaf_index(&self, features: &[f64]) -> Vec<i32> {
        self.gbdt.predict_leaf_index(features)
    }

    fn boosting_type(&self) -> BoostingType {
        BoostingType::Dart
    }
}
