//! Per-feature mapping from raw values to small bin indices.
//!
//! A [`BinMapper`] is fitted once from a sample of a column's values and is
//! immutable afterwards. Validation datasets reuse the training mappers so
//! that bin boundaries agree across datasets.

use std::collections::HashMap;

// =============================================================================
// BinType
// =============================================================================

/// Whether a feature is numerical or categorical.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BinType {
    /// Continuous feature with ordered bins.
    #[default]
    Numerical,
    /// Unordered categories, binned by frequency rank.
    Categorical,
}

// =============================================================================
// BinMapper
// =============================================================================

/// Mapping from feature values to bin indices and back.
///
/// Numerical features store an ascending array of bin upper bounds; a value
/// maps to the first bin whose upper bound is `>= value`. Values beyond the
/// learned range clamp to the nearest end bin. When the value `0.0` occurs in
/// the fitting sample it receives a dedicated boundary, so that for
/// non-negative features zero maps to bin 0 and sparsity survives binning.
///
/// Categorical features are ranked by frequency: the most frequent category
/// is bin 0. When there are more categories than bins, the rare tail is
/// folded into a single "other" bin.
#[derive(Clone, Debug)]
pub struct BinMapper {
    bin_type: BinType,
    /// Ascending upper bounds, one per bin (numerical only).
    bin_upper_bounds: Vec<f64>,
    /// Category value -> bin (categorical only).
    cat_to_bin: HashMap<i64, u32>,
    /// Bin -> category value (categorical only).
    bin_to_cat: Vec<i64>,
    /// Bin index of the folded rare-category bin, if present.
    other_bin: Option<u32>,
    /// Bin that the value `0.0` maps to.
    zero_bin: u32,
    /// Fraction of sampled values equal to zero.
    sparse_rate: f64,
}

impl BinMapper {
    /// Fit a numerical mapper from a sample of column values.
    ///
    /// Implements equi-mass binning: when there are more distinct values than
    /// `max_bin`, boundaries close whenever the accumulated count exceeds the
    /// mean bin mass, never splitting equal values across bins. `max_bin` is
    /// an upper bound; under-filled trailing bins are simply not created.
    pub fn fit_numerical(sample: &[f64], max_bin: usize) -> Self {
        let mut values: Vec<f64> = sample
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());

        // Distinct values with counts.
        let mut distinct: Vec<(f64, usize)> = Vec::new();
        for &v in &values {
            if let Some(last) = distinct.last_mut() {
                if last.0 == v {
                    last.1 += 1;
                    continue;
                }
            }
            distinct.push((v, 1));
        }

        let zero_count = distinct
            .iter()
            .find(|(v, _)| *v == 0.0)
            .map(|(_, c)| *c)
            .unwrap_or(0);
        let sparse_rate = if values.is_empty() {
            0.0
        } else {
            zero_count as f64 / values.len() as f64
        };

        let mut bounds: Vec<f64> = Vec::new();
        if distinct.len() <= max_bin {
            bounds.extend(distinct.iter().map(|(v, _)| *v));
        } else {
            // Zero gets its own boundary so the zero bin holds only zeros.
            let has_zero = zero_count > 0;
            let total: usize = distinct.iter().map(|(_, c)| *c).sum();
            let mean_bin_size = total as f64 / max_bin as f64;
            let mut accumulated = 0usize;
            for (i, &(v, cnt)) in distinct.iter().enumerate() {
                accumulated += cnt;
                let is_last = i + 1 == distinct.len();
                let force_boundary = has_zero
                    && (v == 0.0
                        || (v < 0.0 && distinct.get(i + 1).map(|&(n, _)| n == 0.0) == Some(true)));
                if force_boundary
                    || is_last
                    || (accumulated as f64 >= mean_bin_size && bounds.len() + 1 < max_bin)
                {
                    bounds.push(v);
                    accumulated = 0;
                }
            }
        }
        // Forced zero boundaries can push the count past `max_bin`; merge
        // surplus boundaries away, never touching the zero boundary itself.
        while bounds.len() > max_bin {
            let idx = bounds
                .iter()
                .position(|&b| b != 0.0)
                .unwrap_or(bounds.len() - 1);
            bounds.remove(idx);
        }
        if bounds.is_empty() {
            bounds.push(0.0);
        }

        let zero_bin = bounds.partition_point(|&ub| ub < 0.0) as u32;
        Self {
            bin_type: BinType::Numerical,
            bin_upper_bounds: bounds,
            cat_to_bin: HashMap::new(),
            bin_to_cat: Vec::new(),
            other_bin: None,
            zero_bin,
            sparse_rate,
        }
    }

    /// Fit a categorical mapper from a sample of column values.
    ///
    /// Values are truncated to integers. Categories are ranked by descending
    /// frequency (ties broken by ascending value for determinism); rank is
    /// the bin index. A rare tail beyond `max_bin - 1` categories folds into
    /// one "other" bin.
    pub fn fit_categorical(sample: &[f64], max_bin: usize) -> Self {
        let mut counts: HashMap<i64, usize> = HashMap::new();
        let mut total = 0usize;
        for &v in sample {
            if v.is_finite() {
                *counts.entry(v as i64).or_insert(0) += 1;
                total += 1;
            }
        }
        let mut ranked: Vec<(i64, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let zero_count = ranked
            .iter()
            .find(|(c, _)| *c == 0)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        let sparse_rate = if total == 0 {
            0.0
        } else {
            zero_count as f64 / total as f64
        };

        let (kept, other_bin) = if ranked.len() > max_bin {
            (max_bin - 1, Some((max_bin - 1) as u32))
        } else {
            (ranked.len(), None)
        };
        let mut cat_to_bin = HashMap::new();
        let mut bin_to_cat = Vec::with_capacity(kept);
        for (bin, &(cat, _)) in ranked.iter().take(kept).enumerate() {
            cat_to_bin.insert(cat, bin as u32);
            bin_to_cat.push(cat);
        }
        let zero_bin = cat_to_bin.get(&0).copied().unwrap_or(0);

        Self {
            bin_type: BinType::Categorical,
            bin_upper_bounds: Vec::new(),
            cat_to_bin,
            bin_to_cat,
            other_bin,
            zero_bin,
            sparse_rate,
        }
    }

    /// Map a raw value to its bin.
    #[inline]
    pub fn value_to_bin(&self, value: f64) -> u32 {
        match self.bin_type {
            BinType::Numerical => {
                let bin = self.bin_upper_bounds.partition_point(|&ub| ub < value);
                (bin as u32).min(self.num_bins() as u32 - 1)
            }
            BinType::Categorical => {
                let cat = value as i64;
                match self.cat_to_bin.get(&cat) {
                    Some(&bin) => bin,
                    None => self.other_bin.unwrap_or(0),
                }
            }
        }
    }

    /// The representative value for a bin: the upper bound for numerical
    /// features, the category value for categorical ones.
    #[inline]
    pub fn bin_to_value(&self, bin: u32) -> f64 {
        match self.bin_type {
            BinType::Numerical => self.bin_upper_bounds[bin as usize],
            BinType::Categorical => self
                .bin_to_cat
                .get(bin as usize)
                .copied()
                .unwrap_or(-1) as f64,
        }
    }

    /// Number of bins.
    #[inline]
    pub fn num_bins(&self) -> usize {
        match self.bin_type {
            BinType::Numerical => self.bin_upper_bounds.len(),
            BinType::Categorical => {
                self.bin_to_cat.len() + usize::from(self.other_bin.is_some())
            }
        }
    }

    #[inline]
    pub fn bin_type(&self) -> BinType {
        self.bin_type
    }

    /// Bin that `0.0` maps to.
    #[inline]
    pub fn zero_bin(&self) -> u32 {
        self.zero_bin
    }

    /// Fraction of zeros observed during fitting.
    #[inline]
    pub fn sparse_rate(&self) -> f64 {
        self.sparse_rate
    }

    /// A feature whose every value lands in one bin carries no signal.
    #[inline]
    pub fn is_trivial(&self) -> bool {
        self.num_bins() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_values_get_own_bins() {
        let mapper = BinMapper::fit_numerical(&[0.0, 1.0, 2.0, 3.0, 1.0, 2.0], 255);
        assert_eq!(mapper.num_bins(), 4);
        assert_eq!(mapper.value_to_bin(0.0), 0);
        assert_eq!(mapper.value_to_bin(1.0), 1);
        assert_eq!(mapper.value_to_bin(3.0), 3);
    }

    #[test]
    fn test_round_trip_bound_property() {
        let sample: Vec<f64> = (0..1000).map(|i| (i % 37) as f64 * 0.5).collect();
        let mapper = BinMapper::fit_numerical(&sample, 16);
        for &v in &sample {
            let bin = mapper.value_to_bin(v);
            assert!(v <= mapper.bin_to_value(bin));
            if bin > 0 {
                assert!(mapper.bin_to_value(bin - 1) < v);
            }
        }
    }

    #[test]
    fn test_equi_mass_respects_max_bin() {
        let sample: Vec<f64> = (0..10_000).map(|i| i as f64).collect();
        let mapper = BinMapper::fit_numerical(&sample, 64);
        assert!(mapper.num_bins() <= 64);
        assert!(mapper.num_bins() > 32);
    }

    #[test]
    fn test_zero_preserved_in_bin_zero() {
        let mut sample: Vec<f64> = vec![0.0; 5000];
        sample.extend((1..2000).map(|i| i as f64 * 0.1));
        let mapper = BinMapper::fit_numerical(&sample, 32);
        assert_eq!(mapper.zero_bin(), 0);
        assert_eq!(mapper.value_to_bin(0.0), 0);
        // Nothing non-zero shares the zero bin.
        assert!(mapper.value_to_bin(0.1) > 0);
        assert!(mapper.sparse_rate() > 0.7);
    }

    #[test]
    fn test_out_of_range_clamps_to_end_bins() {
        let mapper = BinMapper::fit_numerical(&[1.0, 2.0, 3.0], 255);
        assert_eq!(mapper.value_to_bin(-100.0), 0);
        assert_eq!(mapper.value_to_bin(100.0), mapper.num_bins() as u32 - 1);
    }

    #[test]
    fn test_categorical_frequency_rank() {
        let sample = vec![7.0, 7.0, 7.0, 2.0, 2.0, 9.0];
        let mapper = BinMapper::fit_categorical(&sample, 255);
        assert_eq!(mapper.value_to_bin(7.0), 0);
        assert_eq!(mapper.value_to_bin(2.0), 1);
        assert_eq!(mapper.value_to_bin(9.0), 2);
        assert_eq!(mapper.bin_to_value(0), 7.0);
    }

    #[test]
    fn test_categorical_rare_tail_folds() {
        let mut sample = Vec::new();
        for cat in 0..20 {
            for _ in 0..(20 - cat) {
                sample.push(cat as f64);
            }
        }
        let mapper = BinMapper::fit_categorical(&sample, 8);
        assert_eq!(mapper.num_bins(), 8);
        // Unseen and rare categories share the "other" bin.
        assert_eq!(mapper.value_to_bin(19.0), 7);
        assert_eq!(mapper.value_to_bin(1234.0), 7);
    }

    #[test]
    fn test_trivial_feature() {
        let mapper = BinMapper::fit_numerical(&[5.0, 5.0, 5.0], 255);
        assert!(mapper.is_trivial());
    }
}
