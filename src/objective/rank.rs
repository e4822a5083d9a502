//! LambdaRank objective for learning to rank.

use rayon::prelude::*;

use crate::data::Metadata;
use crate::error::{Error, Result};
use crate::objective::ObjectiveFunction;

/// Pairwise LambdaRank with NDCG-weighted lambdas.
///
/// Requires query boundaries. Relevance labels index into `label_gain`
/// (default `2^i − 1`). Pairs are weighted by the NDCG change of swapping
/// the two documents, truncated at `max_position`, and scaled by the query
/// weight when weights are present.
pub struct LambdaRank {
    sigmoid: f64,
    label_gain: Vec<f64>,
    max_position: usize,
    label: Vec<u32>,
    query_boundaries: Vec<usize>,
    query_weights: Option<Vec<f32>>,
    /// `1 / maxDCG@max_position` per query; 0 for queries with no relevance.
    inverse_max_dcg: Vec<f64>,
}

impl LambdaRank {
    pub fn new(sigmoid: f64, label_gain: Vec<f64>, max_position: usize) -> Self {
        Self {
            sigmoid,
            label_gain,
            max_position: max_position.max(1),
            label: Vec::new(),
            query_boundaries: Vec::new(),
            query_weights: None,
            inverse_max_dcg: Vec::new(),
        }
    }

    #[inline]
    fn discount(&self, position: usize) -> f64 {
        if position < self.max_position {
            1.0 / (position as f64 + 2.0).log2()
        } else {
            0.0
        }
    }

    fn compute_query(
        &self,
        query: usize,
        score: &[f64],
        gradients: &mut [f32],
        hessians: &mut [f32],
    ) {
        gradients.fill(0.0);
        hessians.fill(0.0);
        let inverse_max_dcg = self.inverse_max_dcg[query];
        if inverse_max_dcg == 0.0 {
            return;
        }
        let begin = self.query_boundaries[query];
        let count = score.len();
        let label = &self.label[begin..begin + count];

        // Positions from the current ranking, best score first; ties keep
        // row order for determinism.
        let mut sorted: Vec<usize> = (0..count).collect();
        sorted.sort_by(|&a, &b| score[b].partial_cmp(&score[a]).unwrap().then(a.cmp(&b)));
        let mut position = vec![0usize; count];
        for (pos, &idx) in sorted.iter().enumerate() {
            position[idx] = pos;
        }

        let query_weight = self
            .query_weights
            .as_ref()
            .map_or(1.0, |w| w[query] as f64);

        for a in 0..count {
            for b in a + 1..count {
                if label[a] == label[b] {
                    continue;
                }
                let (high, low) = if label[a] > label[b] { (a, b) } else { (b, a) };
                let delta_ndcg = (self.label_gain[label[high] as usize]
                    - self.label_gain[label[low] as usize])
                    * (self.discount(position[high]) - self.discount(position[low])).abs()
                    * inverse_max_dcg;
                if delta_ndcg == 0.0 {
                    continue;
                }
                let delta = delta_ndcg * query_weight;
                let rho = 1.0 / (1.0 + (self.sigmoid * (score[high] - score[low])).exp());
                let lambda = self.sigmoid * rho * delta;
                let weight = self.sigmoid * self.sigmoid * rho * (1.0 - rho) * delta;
                gradients[high] -= lambda as f32;
                gradients[low] += lambda as f32;
                hessians[high] += weight as f32;
                hessians[low] += weight as f32;
            }
        }
    }
}

impl ObjectiveFunction for LambdaRank {
    fn init(&mut self, metadata: &Metadata, num_data: usize) -> Result<()> {
        let Some(boundaries) = metadata.query_boundaries() else {
            return Err(Error::DataShape(
                "lambdarank requires query boundaries".into(),
            ));
        };
        self.query_boundaries = boundaries.to_vec();
        self.query_weights = metadata.query_weights().map(<[f32]>::to_vec);

        let max_label = metadata.label().iter().fold(0i64, |m, &l| m.max(l as i64));
        if max_label < 0 {
            return Err(Error::DataShape("ranking labels must be >= 0".into()));
        }
        if self.label_gain.is_empty() {
            // 2^i - 1, the standard relevance gain.
            self.label_gain = (0..=max_label.min(31))
                .map(|i| (1u64 << i) as f64 - 1.0)
                .collect();
        }
        if max_label as usize >= self.label_gain.len() {
            return Err(Error::DataShape(format!(
                "label {} exceeds label_gain table of {}",
                max_label,
                self.label_gain.len()
            )));
        }
        self.label = metadata.label().iter().map(|&l| l as u32).collect();
        if self.label.len() != num_data {
            return Err(Error::DataShape("label length != num_data".into()));
        }

        // maxDCG@k per query from labels sorted descending.
        self.inverse_max_dcg = self
            .query_boundaries
            .windows(2)
            .map(|w| {
                let mut gains: Vec<f64> = self.label[w[0]..w[1]]
                    .iter()
                    .map(|&l| self.label_gain[l as usize])
                    .collect();
                gains.sort_by(|a, b| b.partial_cmp(a).unwrap());
                let dcg: f64 = gains
                    .iter()
                    .enumerate()
                    .map(|(pos, g)| g * self.discount(pos))
                    .sum();
                if dcg > 0.0 {
                    1.0 / dcg
                } else {
                    0.0
                }
            })
            .collect();
        Ok(())
    }

    fn get_gradients(&self, score: &[f64], gradients: &mut [f32], hessians: &mut [f32]) {
        // Queries own disjoint row ranges; carve per-query slices and run
        // them in parallel.
        let mut grad_rest = gradients;
        let mut hess_rest = hessians;
        let mut slices = Vec::with_capacity(self.query_boundaries.len() - 1);
        for w in self.query_boundaries.windows(2) {
            let count = w[1] - w[0];
            let (grad_head, grad_tail) = std::mem::take(&mut grad_rest).split_at_mut(count);
            let (hess_head, hess_tail) = std::mem::take(&mut hess_rest).split_at_mut(count);
            grad_rest = grad_tail;
            hess_rest = hess_tail;
            slices.push((grad_head, hess_head));
        }
        slices
            .into_par_iter()
            .enumerate()
            .for_each(|(query, (grad, hess))| {
                let begin = self.query_boundaries[query];
                let end = self.query_boundaries[query + 1];
                self.compute_query(query, &score[begin..end], grad, hess);
            });
    }

    fn name(&self) -> &'static str {
        "lambdarank"
    }

    fn sigmoid(&self) -> f64 {
        self.sigmoid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranking_metadata() -> Metadata {
        let mut meta = Metadata::new(6, 1);
        meta.set_label(&[2.0, 1.0, 0.0, 0.0, 1.0, 0.0]).unwrap();
        meta.set_query_counts(&[3, 3]).unwrap();
        meta
    }

    #[test]
    fn test_requires_queries() {
        let mut meta = Metadata::new(4, 1);
        meta.set_label(&[0.0, 1.0, 0.0, 1.0]).unwrap();
        let mut objective = LambdaRank::new(1.0, Vec::new(), 20);
        assert!(objective.init(&meta, 4).is_err());
    }

    #[test]
    fn test_default_label_gain() {
        let meta = ranking_metadata();
        let mut objective = LambdaRank::new(1.0, Vec::new(), 20);
        objective.init(&meta, 6).unwrap();
        assert_eq!(objective.label_gain, vec![0.0, 1.0, 3.0]);
    }

    #[test]
    fn test_gradients_push_relevant_up() {
        let meta = ranking_metadata();
        let mut objective = LambdaRank::new(1.0, Vec::new(), 20);
        objective.init(&meta, 6).unwrap();

        // All scores equal: the relevant document must be pushed up
        // (negative gradient) and the irrelevant ones down.
        let score = vec![0.0; 6];
        let mut grad = vec![0.0f32; 6];
        let mut hess = vec![0.0f32; 6];
        objective.get_gradients(&score, &mut grad, &mut hess);

        assert!(grad[0] < 0.0);
        assert!(grad[2] > 0.0);
        assert!(grad[4] < 0.0);
        // Lambdas cancel within a query.
        let q0: f32 = grad[0..3].iter().sum();
        let q1: f32 = grad[3..6].iter().sum();
        assert!(q0.abs() < 1e-6);
        assert!(q1.abs() < 1e-6);
        assert!(hess[0] > 0.0);
    }

    #[test]
    fn test_all_same_label_query_is_silent() {
        let mut meta = Metadata::new(3, 1);
        meta.set_label(&[1.0, 1.0, 1.0]).unwrap();
        meta.set_query_counts(&[3]).unwrap();
        let mut objective = LambdaRank::new(1.0, Vec::new(), 20);
        objective.init(&meta, 3).unwrap();

        let score = vec![0.5, -0.5, 0.0];
        let mut grad = vec![9.0f32; 3];
        let mut hess = vec![9.0f32; 3];
        objective.get_gradients(&score, &mut grad, &mut hess);
        assert_eq!(grad, vec![0.0; 3]);
        assert_eq!(hess, vec![0.0; 3]);
    }
}
