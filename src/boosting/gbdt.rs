//! GBDT boosting controller.
//!
//! Drives the iteration loop: pulls gradients from the objective, re-bags
//! rows, trains one tree per class, applies shrinkage, updates every
//! registered score buffer, evaluates metrics and handles early stopping.

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::boosting::model::{self, LoadedModel};
use crate::boosting::Boosting;
use crate::config::{BoostingType, Config, TreeLearnerType};
use crate::data::Dataset;
use crate::error::{Error, Result};
use crate::metric::{create_metrics, Metric};
use crate::objective::{create_objective, ObjectiveFunction};
use crate::training::{ScoreUpdater, SerialTreeLearner};
use crate::tree::Tree;

/// Gradient-boosted decision tree controller.
pub struct Gbdt<'a> {
    pub(crate) config: Config,
    pub(crate) train_data: &'a Dataset,
    pub(crate) objective: Box<dyn ObjectiveFunction>,
    pub(crate) training_metrics: Vec<Box<dyn Metric>>,

    pub(crate) valid_data: Vec<&'a Dataset>,
    pub(crate) valid_score: Vec<ScoreUpdater>,
    pub(crate) valid_metrics: Vec<Vec<Box<dyn Metric>>>,
    /// Best value seen per (valid set, metric); NaN until first evaluation.
    pub(crate) best_score: Vec<Vec<f64>>,
    pub(crate) best_iter: Vec<Vec<usize>>,

    /// One learner per class, as the original trains per-class trees.
    pub(crate) tree_learners: Vec<SerialTreeLearner>,
    pub(crate) train_score: ScoreUpdater,
    /// Class-major gradient/hessian buffers, allocated once.
    pub(crate) gradients: Vec<f32>,
    pub(crate) hessians: Vec<f32>,

    pub(crate) num_data: usize,
    /// Trees per iteration (`K` for multiclass, else 1).
    pub(crate) num_class: usize,
    pub(crate) max_feature_idx: usize,
    pub(crate) label_index: usize,

    pub(crate) iter: usize,
    pub(crate) models: Vec<Tree>,
    /// Iterations used by prediction.
    pub(crate) num_used_model: usize,

    pub(crate) bag_rng: Xoshiro256PlusPlus,
    pub(crate) bag_indices: Vec<u32>,
    pub(crate) oob_indices: Vec<u32>,
    pub(crate) bagging_enabled: bool,
}

impl<'a> Gbdt<'a> {
    pub fn new(config: &Config, train_data: &'a Dataset) -> Result<Self> {
        config.check()?;
        if config.tree.tree_learner != TreeLearnerType::Serial {
            log::warn!(
                "distributed tree learners need the network layer; falling back to serial"
            );
        }

        let num_data = train_data.num_data();
        let num_class = config.num_tree_per_iteration();

        let mut objective = create_objective(config);
        objective.init(train_data.metadata(), num_data)?;

        let mut training_metrics = if config.is_training_metric {
            create_metrics(config)
        } else {
            Vec::new()
        };
        for metric in &mut training_metrics {
            metric.init(train_data.metadata(), num_data)?;
        }

        let tree_learners = (0..num_class)
            .map(|_| SerialTreeLearner::new(train_data, &config.tree))
            .collect();

        let bagging_enabled = config.bagging_fraction < 1.0 && config.bagging_freq > 0;

        Ok(Self {
            train_score: ScoreUpdater::new(train_data, num_class),
            gradients: vec![0.0; num_data * num_class],
            hessians: vec![0.0; num_data * num_class],
            max_feature_idx: train_data.num_total_features().saturating_sub(1),
            label_index: 0,
            valid_data: Vec::new(),
            valid_score: Vec::new(),
            valid_metrics: Vec::new(),
            best_score: Vec::new(),
            best_iter: Vec::new(),
            iter: 0,
            models: Vec::new(),
            num_used_model: 0,
            bag_rng: Xoshiro256PlusPlus::seed_from_u64(config.bagging_seed),
            bag_indices: Vec::new(),
            oob_indices: Vec::new(),
            bagging_enabled,
            objective,
            training_metrics,
            tree_learners,
            num_data,
            num_class,
            config: config.clone(),
            train_data,
        })
    }

    /// Ask the objective for gradients of the current training scores.
    pub(crate) fn boosting(&mut self) {
        self.objective
            .get_gradients(self.train_score.score(), &mut self.gradients, &mut self.hessians);
    }

    /// Re-bag every `bagging_freq` iterations. Whole queries go in or out
    /// together when query boundaries exist.
    pub(crate) fn bagging(&mut self, iter: usize) {
        if !self.bagging_enabled || iter % self.config.bagging_freq != 0 {
            return;
        }
        self.bag_indices.clear();
        self.oob_indices.clear();

        match self.train_data.metadata().query_boundaries() {
            None => {
                let bag_cnt =
                    (self.config.bagging_fraction * self.num_data as f64) as usize;
                let mut taken = 0usize;
                for i in 0..self.num_data {
                    let remaining = self.num_data - i;
                    let probability =
                        bag_cnt.saturating_sub(taken) as f64 / remaining as f64;
                    if self.bag_rng.gen::<f64>() < probability {
                        self.bag_indices.push(i as u32);
                        taken += 1;
                    } else {
                        self.oob_indices.push(i as u32);
                    }
                }
            }
            Some(boundaries) => {
                let num_queries = boundaries.len() - 1;
                let bag_query_cnt =
                    (self.config.bagging_fraction * num_queries as f64) as usize;
                let mut taken = 0usize;
                for q in 0..num_queries {
                    let remaining = num_queries - q;
                    let probability =
                        bag_query_cnt.saturating_sub(taken) as f64 / remaining as f64;
                    let rows = boundaries[q] as u32..boundaries[q + 1] as u32;
                    if self.bag_rng.gen::<f64>() < probability {
                        self.bag_indices.extend(rows);
                        taken += 1;
                    } else {
                        self.oob_indices.extend(rows);
                    }
                }
            }
        }
        log::info!("re-bagging, using {} rows to train", self.bag_indices.len());
        for learner in &mut self.tree_learners {
            learner.set_bagging_data(Some(&self.bag_indices));
        }
    }

    /// Train one tree for class `k` from the shared gradient buffers.
    /// Returns `None` when no admissible split exists.
    pub(crate) fn train_tree_for_class(&mut self, k: usize) -> Option<Tree> {
        let offset = k * self.num_data;
        let gradients = &self.gradients[offset..offset + self.num_data];
        let hessians = &self.hessians[offset..offset + self.num_data];
        let tree = self.tree_learners[k].train(self.train_data, gradients, hessians);
        if tree.num_leaves() <= 1 {
            None
        } else {
            Some(tree)
        }
    }

    /// Push a committed tree's outputs into every score buffer.
    pub(crate) fn update_score(&mut self, tree: &Tree, k: usize) {
        // In-bag rows via the learner's cached leaf membership.
        self.train_score
            .add_score_learner(&self.tree_learners[k], tree, k);
        // Out-of-bag rows need a traversal.
        if !self.oob_indices.is_empty() {
            self.train_score
                .add_score_subset(tree, self.train_data, &self.oob_indices, k);
        }
        for (i, updater) in self.valid_score.iter_mut().enumerate() {
            updater.add_score_tree(tree, self.valid_data[i], k);
        }
    }

    /// Log metrics at the `output_freq` cadence and run the early-stopping
    /// bookkeeping. Returns true when every validation metric has gone
    /// `early_stopping_round` iterations without improving.
    pub(crate) fn output_metric(&mut self, iter: usize) -> bool {
        let output = iter % self.config.output_freq == 0;
        if output {
            for metric in &self.training_metrics {
                let values = metric.eval(self.train_score.score());
                log::info!("iteration {}, training {}: {:?}", iter, metric.name(), values);
            }
        }

        let round = self.config.early_stopping_round;
        let mut any_metric = false;
        let mut all_stalled = true;
        for i in 0..self.valid_metrics.len() {
            for j in 0..self.valid_metrics[i].len() {
                if !output && round == 0 {
                    continue;
                }
                let values = self.valid_metrics[i][j].eval(self.valid_score[i].score());
                if output {
                    log::info!(
                        "iteration {}, valid_{} {}: {:?}",
                        iter,
                        i + 1,
                        self.valid_metrics[i][j].name(),
                        values
                    );
                }
                if round > 0 {
                    any_metric = true;
                    let value = *values.last().unwrap();
                    let best = self.best_score[i][j];
                    let bigger_better = self.valid_metrics[i][j].is_bigger_better();
                    let improved = best.is_nan()
                        || (bigger_better && value > best)
                        || (!bigger_better && value < best);
                    if improved {
                        self.best_score[i][j] = value;
                        self.best_iter[i][j] = iter;
                        all_stalled = false;
                    } else if iter - self.best_iter[i][j] < round {
                        all_stalled = false;
                    }
                }
            }
        }
        round > 0 && any_metric && all_stalled
    }

    /// Wrap up one iteration: evaluate, count, pop trees on early stop.
    pub(crate) fn finish_iteration(&mut self, is_eval: bool) -> bool {
        let mut is_finished = false;
        if is_eval {
            is_finished = self.output_metric(self.iter + 1);
        }
        self.iter += 1;
        self.num_used_model = self.models.len() / self.num_class;
        if is_finished {
            let pop = self.config.early_stopping_round * self.num_class;
            self.models.truncate(self.models.len().saturating_sub(pop));
            self.num_used_model = self.models.len() / self.num_class;
            log::info!(
                "early stopping at iteration {}, best iteration is {}",
                self.iter,
                self.iter - self.config.early_stopping_round
            );
        }
        is_finished
    }

    pub(crate) fn set_custom_gradients(
        &mut self,
        gradients: &[f32],
        hessians: &[f32],
    ) -> Result<()> {
        let expected = self.num_data * self.num_class;
        if gradients.len() != expected || hessians.len() != expected {
            return Err(Error::DataShape(format!(
                "custom gradients must have length num_data * num_class = {}",
                expected
            )));
        }
        self.gradients.copy_from_slice(gradients);
        self.hessians.copy_from_slice(hessians);
        Ok(())
    }

    pub(crate) fn train_loop(&mut self) -> Result<()> {
        while self.iter < self.config.num_iterations {
            if self.train_one_iter(None, None, true)? {
                break;
            }
        }
        if let Some(path) = self.config.output_model.clone() {
            self.save_model(&path)?;
        }
        Ok(())
    }

    /// Transformed per-row outputs for a registered dataset's score buffer.
    pub(crate) fn transformed_scores(&self, score: &[f64], num_data: usize) -> Vec<f64> {
        let mut out = vec![0.0; score.len()];
        let mut row = vec![0.0; self.num_class];
        for i in 0..num_data {
            for k in 0..self.num_class {
                row[k] = score[k * num_data + i];
            }
            self.objective.convert_output(&mut row);
            for k in 0..self.num_class {
                out[k * num_data + i] = row[k];
            }
        }
        out
    }
}

impl<'a> Boosting<'a> for Gbdt<'a> {
    fn add_valid_data(&mut self, data: &'a Dataset) -> Result<()> {
        if self.iter > 0 {
            return Err(Error::Config(
                "validation data must be added before training starts".into(),
            ));
        }
        let mut metrics = create_metrics(&self.config);
        for metric in &mut metrics {
            metric.init(data.metadata(), data.num_data())?;
        }
        self.valid_score.push(ScoreUpdater::new(data, self.num_class));
        self.best_score.push(vec![f64::NAN; metrics.len()]);
        self.best_iter.push(vec![0; metrics.len()]);
        self.valid_metrics.push(metrics);
        self.valid_data.push(data);
        Ok(())
    }

    fn train(&mut self) -> Result<()> {
        if self.config.num_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.num_threads)
                .build()
                .map_err(|e| Error::Config(format!("cannot build thread pool: {}", e)))?;
            pool.install(|| self.train_loop())
        } else {
            self.train_loop()
        }
    }

    fn train_one_iter(
        &mut self,
        gradients: Option<&[f32]>,
        hessians: Option<&[f32]>,
        is_eval: bool,
    ) -> Result<bool> {
        match (gradients, hessians) {
            (Some(g), Some(h)) => self.set_custom_gradients(g, h)?,
            (None, None) => self.boosting(),
            _ => {
                return Err(Error::Config(
                    "gradients and hessians must be supplied together".into(),
                ))
            }
        }
        self.bagging(self.iter);

        for k in 0..self.num_class {
            let Some(mut tree) = self.train_tree_for_class(k) else {
                log::info!("stopped training: no leaf meets the split requirements");
                return Ok(true);
            };
            tree.shrinkage(self.config.learning_rate);
            self.update_score(&tree, k);
            self.models.push(tree);
        }

        Ok(self.finish_iteration(is_eval))
    }

    fn eval_at(&self, data_idx: usize) -> Vec<f64> {
        if data_idx == 0 {
            self.training_metrics
                .iter()
                .flat_map(|m| m.eval(self.train_score.score()))
                .collect()
        } else {
            let i = data_idx - 1;
            self.valid_metrics[i]
                .iter()
                .flat_map(|m| m.eval(self.valid_score[i].score()))
                .collect()
        }
    }

    fn score_of(&self, data_idx: usize) -> &[f64] {
        if data_idx == 0 {
            self.train_score.score()
        } else {
            self.valid_score[data_idx - 1].score()
        }
    }

    fn predict_of(&self, data_idx: usize) -> Vec<f64> {
        let (score, num_data) = if data_idx == 0 {
            (self.train_score.score(), self.num_data)
        } else {
            let updater = &self.valid_score[data_idx - 1];
            (updater.score(), updater.num_data())
        };
        self.transformed_scores(score, num_data)
    }

    fn num_iterations_trained(&self) -> usize {
        self.num_used_model
    }

    fn save_model(&self, path: &str) -> Result<()> {
        std::fs::write(path, self.to_model_string())?;
        Ok(())
    }

    fn to_model_string(&self) -> String {
        model::model_to_string(
            self.config.boosting_type,
            self.num_class,
            self.label_index,
            self.max_feature_idx,
            self.objective.sigmoid(),
            &self.models[..self.num_used_model * self.num_class],
            self.train_data.feature_names(),
        )
    }

    fn models_from_string(&mut self, text: &str) -> Result<()> {
        let loaded = LoadedModel::from_string(text)?;
        if loaded.num_class != self.num_class {
            return Err(Error::ModelFormat(format!(
                "model has {} classes, booster expects {}",
                loaded.num_class, self.num_class
            )));
        }
        self.models = loaded.trees;
        self.num_used_model = self.models.len() / self.num_class;
        Ok(())
    }

    fn predict_raw(&self, features: &[f64]) -> Vec<f64> {
        model::predict_raw(&self.models, self.num_class, self.num_used_model, features)
    }

    fn predict(&self, features: &[f64]) -> Vec<f64> {
        let mut raw = self.predict_raw(features);
        self.objective.convert_output(&mut raw);
        raw
    }

    fn predict_leaf_index(&self, features: &[f64]) -> Vec<i32> {
        self.models[..self.num_used_model * self.num_class]
            .iter()
            .map(|t| t.predict_leaf_index(features))
            .collect()
    }

    fn boosting_type(&self) -> BoostingType {
        BoostingType::Gbdt
    }
}
