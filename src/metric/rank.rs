//! Ranking metrics.

use crate::data::Metadata;
use crate::error::{Error, Result};
use crate::metric::Metric;

/// NDCG truncated at `max_position`, averaged over queries (weighted by the
/// query weights when present).
pub struct NdcgMetric {
    label_gain: Vec<f64>,
    max_position: usize,
    label: Vec<u32>,
    query_boundaries: Vec<usize>,
    query_weights: Option<Vec<f32>>,
}

impl NdcgMetric {
    pub fn new(label_gain: Vec<f64>, max_position: usize) -> Self {
        Self {
            label_gain,
            max_position: max_position.max(1),
            label: Vec::new(),
            query_boundaries: Vec::new(),
            query_weights: None,
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

    fn query_ndcg(&self, score: &[f64], label: &[u32]) -> f64 {
        let count = score.len();
        let mut sorted: Vec<usize> = (0..count).collect();
        sorted.sort_by(|&a, &b| score[b].partial_cmp(&score[a]).unwrap().then(a.cmp(&b)));
        let dcg: f64 = sorted
            .iter()
            .enumerate()
            .map(|(pos, &idx)| self.label_gain[label[idx] as usize] * self.discount(pos))
            .sum();

        let mut ideal: Vec<f64> = label
            .iter()
            .map(|&l| self.label_gain[l as usize])
            .collect();
        ideal.sort_by(|a, b| b.partial_cmp(a).unwrap());
        let max_dcg: f64 = ideal
            .iter()
            .enumerate()
            .map(|(pos, g)| g * self.discount(pos))
            .sum();

        if max_dcg > 0.0 {
            dcg / max_dcg
        } else {
            // A query with no relevant documents counts as perfectly ranked.
            1.0
        }
    }
}

impl Metric for NdcgMetric {
    fn init(&mut self, metadata: &Metadata, _num_data: usize) -> Result<()> {
        let Some(boundaries) = metadata.query_boundaries() else {
            return Err(Error::DataShape("ndcg requires query boundaries".into()));
        };
        self.query_boundaries = boundaries.to_vec();
        self.query_weights = metadata.query_weights().map(<[f32]>::to_vec);
        let max_label = metadata.label().iter().fold(0i64, |m, &l| m.max(l as i64));
        if self.label_gain.is_empty() {
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
        Ok(())
    }

    fn eval(&self, score: &[f64]) -> Vec<f64> {
        let mut ndcg_sum = 0.0;
        let mut weight_sum = 0.0;
        for (query, w) in self.query_boundaries.windows(2).enumerate() {
            let (begin, end) = (w[0], w[1]);
            let weight = self
                .query_weights
                .as_ref()
                .map_or(1.0, |qw| qw[query] as f64);
            ndcg_sum += self.query_ndcg(&score[begin..end], &self.label[begin..end]) * weight;
            weight_sum += weight;
        }
        vec![ndcg_sum / weight_sum]
    }

    fn is_bigger_better(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "ndcg"
    }
}
