//! Labels, weights, query boundaries and initial scores for one dataset.

use crate::error::{Error, Result};

/// Per-row side information owned by a [`crate::data::Dataset`].
///
/// Labels are set once; weights, queries and initial scores are optional and
/// must be set before training starts. Setters validate shapes against the
/// dataset eagerly. The training core assumes these arrays are stable for the
/// duration of `train`.
#[derive(Clone, Debug)]
pub struct Metadata {
    num_data: usize,
    num_class: usize,
    label: Vec<f32>,
    weights: Option<Vec<f32>>,
    /// `q + 1` row offsets; query `i` spans `[boundaries[i], boundaries[i+1])`.
    query_boundaries: Option<Vec<usize>>,
    /// Mean row weight per query, derived when both weights and queries exist.
    query_weights: Option<Vec<f32>>,
    /// Class-major initial scores, length `num_data * num_class`.
    init_score: Option<Vec<f64>>,
}

impl Metadata {
    pub fn new(num_data: usize, num_class: usize) -> Self {
        Self {
            num_data,
            num_class,
            label: Vec::new(),
            weights: None,
            query_boundaries: None,
            query_weights: None,
            init_score: None,
        }
    }

    #[inline]
    pub fn num_data(&self) -> usize {
        self.num_data
    }

    #[inline]
    pub fn num_class(&self) -> usize {
        self.num_class
    }

    pub fn set_label(&mut self, label: &[f32]) -> Result<()> {
        if label.len() != self.num_data {
            return Err(Error::DataShape(format!(
                "label length {} != num_data {}",
                label.len(),
                self.num_data
            )));
        }
        self.label = label.to_vec();
        Ok(())
    }

    pub fn set_weights(&mut self, weights: &[f32]) -> Result<()> {
        if weights.len() != self.num_data {
            return Err(Error::DataShape(format!(
                "weight length {} != num_data {}",
                weights.len(),
                self.num_data
            )));
        }
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(Error::DataShape("weights must be finite and >= 0".into()));
        }
        self.weights = Some(weights.to_vec());
        self.derive_query_weights();
        Ok(())
    }

    /// Set query boundaries as `q + 1` ascending row offsets.
    pub fn set_query_boundaries(&mut self, boundaries: &[usize]) -> Result<()> {
        if boundaries.len() < 2
            || boundaries[0] != 0
            || *boundaries.last().unwrap() != self.num_data
            || boundaries.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(Error::DataShape(
                "query boundaries must partition [0, num_data) exactly".into(),
            ));
        }
        self.query_boundaries = Some(boundaries.to_vec());
        self.derive_query_weights();
        Ok(())
    }

    /// Set queries as per-query row counts (the `.query` side-file form).
    pub fn set_query_counts(&mut self, counts: &[usize]) -> Result<()> {
        let mut boundaries = Vec::with_capacity(counts.len() + 1);
        boundaries.push(0);
        let mut acc = 0usize;
        for &c in counts {
            acc += c;
            boundaries.push(acc);
        }
        self.set_query_boundaries(&boundaries)
    }

    /// Set class-major initial scores, length `num_data * num_class`.
    pub fn set_init_score(&mut self, init_score: &[f64]) -> Result<()> {
        if init_score.len() != self.num_data * self.num_class {
            return Err(Error::DataShape(format!(
                "init score length {} != num_data * num_class = {}",
                init_score.len(),
                self.num_data * self.num_class
            )));
        }
        self.init_score = Some(init_score.to_vec());
        Ok(())
    }

    #[inline]
    pub fn label(&self) -> &[f32] {
        &self.label
    }

    #[inline]
    pub fn weights(&self) -> Option<&[f32]> {
        self.weights.as_deref()
    }

    #[inline]
    pub fn query_boundaries(&self) -> Option<&[usize]> {
        self.query_boundaries.as_deref()
    }

    #[inline]
    pub fn query_weights(&self) -> Option<&[f32]> {
        self.query_weights.as_deref()
    }

    #[inline]
    pub fn init_score(&self) -> Option<&[f64]> {
        self.init_score.as_deref()
    }

    #[inline]
    pub fn num_queries(&self) -> usize {
        self.query_boundaries.as_ref().map_or(0, |b| b.len() - 1)
    }

    /// Query weight is the mean of its row weights (sum over query length).
    fn derive_query_weights(&mut self) {
        let (Some(weights), Some(boundaries)) =
            (self.weights.as_ref(), self.query_boundaries.as_ref())
        else {
            return;
        };
        let mut query_weights = Vec::with_capacity(boundaries.len() - 1);
        for w in boundaries.windows(2) {
            let (begin, end) = (w[0], w[1]);
            let sum: f32 = weights[begin..end].iter().sum();
            query_weights.push(sum / (end - begin) as f32);
        }
        self.query_weights = Some(query_weights);
    }
}
