//! Histogram construction and the LRU histogram pool.
//!
//! A leaf's histogram set is one flat array of [`HistogramEntry`] covering
//! every used feature, with per-feature offsets. Histograms are by far the
//! dominant memory consumer, so slots are pooled and keyed by leaf index with
//! least-recently-used eviction; a miss tells the caller to rebuild from
//! scratch. Sibling histograms are derived by subtraction from the parent.

use rayon::prelude::*;

use crate::data::{BinStorage, Feature, OrderedSparseBin};

// =============================================================================
// HistogramEntry
// =============================================================================

/// Per-bin accumulator: gradient sum, hessian sum and row count.
#[derive(Clone, Copy, Debug, Default)]
pub struct HistogramEntry {
    pub sum_grad: f64,
    pub sum_hess: f64,
    pub count: u32,
}

// =============================================================================
// Building
// =============================================================================

/// Build the histogram set of one leaf into `out`.
///
/// Features are processed in parallel; each feature's scan is sequential, so
/// the float sums do not depend on the worker count. For ordered-sparse
/// features only the non-zero bins are accumulated and bin 0 is reconstructed
/// from the leaf totals, which keeps the cost proportional to the non-zeros
/// in the leaf.
#[allow(clippy::too_many_arguments)]
pub fn construct_histograms(
    out: &mut [HistogramEntry],
    offsets: &[usize],
    features: &[Feature],
    is_feature_used: &[bool],
    leaf_indices: &[u32],
    ordered_bins: &[Option<OrderedSparseBin>],
    leaf: usize,
    leaf_sum_grad: f64,
    leaf_sum_hess: f64,
    gradients: &[f32],
    hessians: &[f32],
) {
    let slices = split_by_offsets(out, offsets);
    slices
        .into_par_iter()
        .enumerate()
        .for_each(|(f, slice)| {
            slice.fill(HistogramEntry::default());
            if !is_feature_used[f] {
                return;
            }
            match features[f].storage() {
                BinStorage::Dense(dense) => {
                    dense.construct_histogram(leaf_indices, gradients, hessians, slice);
                }
                BinStorage::Sparse(_) => {
                    let ordered = ordered_bins[f]
                        .as_ref()
                        .expect("sparse feature without ordered bin");
                    ordered.construct_histogram(leaf, gradients, hessians, slice);
                    // Bin 0 holds whatever the non-zero bins do not.
                    let mut rest = HistogramEntry::default();
                    for entry in slice[1..].iter() {
                        rest.sum_grad += entry.sum_grad;
                        rest.sum_hess += entry.sum_hess;
                        rest.count += entry.count;
                    }
                    slice[0] = HistogramEntry {
                        sum_grad: leaf_sum_grad - rest.sum_grad,
                        sum_hess: leaf_sum_hess - rest.sum_hess,
                        count: leaf_indices.len() as u32 - rest.count,
                    };
                }
            }
        });
}

/// `parent -= child`, leaving the sibling histogram in `parent`.
pub fn subtract_histogram(parent: &mut [HistogramEntry], child: &[HistogramEntry]) {
    debug_assert_eq!(parent.len(), child.len());
    for (p, c) in parent.iter_mut().zip(child) {
        p.sum_grad -= c.sum_grad;
        p.sum_hess -= c.sum_hess;
        p.count -= c.count;
    }
}

/// Carve a flat histogram into disjoint per-feature slices.
fn split_by_offsets<'a>(
    mut data: &'a mut [HistogramEntry],
    offsets: &[usize],
) -> Vec<&'a mut [HistogramEntry]> {
    let mut slices = Vec::with_capacity(offsets.len() - 1);
    for window in offsets.windows(2) {
        let (head, tail) = std::mem::take(&mut data).split_at_mut(window[1] - window[0]);
        slices.push(head);
        data = tail;
    }
    slices
}

// =============================================================================
// HistogramPool
// =============================================================================

/// LRU pool of histogram sets, keyed by leaf index.
///
/// The conservative capacity is one slot per possible leaf (slots are keyed
/// by leaf id, so that covers every histogram leaf-wise growth can hold at
/// once); a configured cap trades re-computation for memory. With full
/// capacity the pool degenerates to direct indexing and skips all eviction
/// bookkeeping.
///
/// The leaf being split and its sibling are always the two most recently
/// touched slots, so the least-recently-used victim is never one of them.
pub struct HistogramPool {
    /// `cache_size` slots, each holding one flat histogram set.
    pool: Vec<Vec<HistogramEntry>>,
    /// Per-feature offsets into a slot, length `num_features + 1`.
    offsets: Vec<usize>,
    cache_size: usize,
    total_size: usize,
    is_enough: bool,
    /// Leaf -> slot, or -1.
    mapper: Vec<i32>,
    /// Slot -> leaf, or -1.
    inverse_mapper: Vec<i32>,
    last_used_time: Vec<u64>,
    cur_time: u64,
}

/// Result of a pool lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acquire {
    pub slot: usize,
    /// True when the slot still holds this leaf's data.
    pub hit: bool,
}

impl HistogramPool {
    /// Create a pool for `total_size` leaves with at most `cache_size` live
    /// histogram sets. `cache_size == 0` means "enough for every leaf".
    pub fn new(bin_counts: &[usize], cache_size: usize, total_size: usize) -> Self {
        let mut offsets = Vec::with_capacity(bin_counts.len() + 1);
        offsets.push(0);
        for &n in bin_counts {
            offsets.push(offsets.last().unwrap() + n);
        }
        let slot_len = *offsets.last().unwrap();

        let cache_size = if cache_size == 0 {
            total_size
        } else {
            // Two live slots minimum: the leaf being split and its sibling.
            cache_size.clamp(2, total_size)
        };
        let is_enough = cache_size == total_size;

        Self {
            pool: (0..cache_size).map(|_| vec![HistogramEntry::default(); slot_len]).collect(),
            offsets,
            cache_size,
            total_size,
            is_enough,
            mapper: vec![-1; total_size],
            inverse_mapper: vec![-1; cache_size],
            last_used_time: vec![0; cache_size],
            cur_time: 0,
        }
    }

    /// Forget all leaf->slot assignments (start of a new tree).
    pub fn reset_map(&mut self) {
        if !self.is_enough {
            self.cur_time = 0;
            self.mapper.fill(-1);
            self.inverse_mapper.fill(-1);
            self.last_used_time.fill(0);
        }
    }

    /// Look up the slot for `leaf`, evicting the least-recently-used slot on
    /// a miss. A miss means the caller must rebuild the histogram.
    pub fn acquire(&mut self, leaf: usize) -> Acquire {
        if self.is_enough {
            return Acquire { slot: leaf, hit: true };
        }
        if self.mapper[leaf] >= 0 {
            let slot = self.mapper[leaf] as usize;
            self.cur_time += 1;
            self.last_used_time[slot] = self.cur_time;
            return Acquire { slot, hit: true };
        }
        // Evict the stalest slot.
        let slot = self
            .last_used_time
            .iter()
            .enumerate()
            .min_by_key(|&(_, &t)| t)
            .map(|(i, _)| i)
            .unwrap();
        self.cur_time += 1;
        self.last_used_time[slot] = self.cur_time;
        if self.inverse_mapper[slot] >= 0 {
            self.mapper[self.inverse_mapper[slot] as usize] = -1;
        }
        self.mapper[leaf] = slot as i32;
        self.inverse_mapper[slot] = leaf as i32;
        Acquire { slot, hit: false }
    }

    /// Whether `leaf`'s histogram is currently resident.
    pub fn is_resident(&self, leaf: usize) -> bool {
        self.is_enough || self.mapper[leaf] >= 0
    }

    /// Re-key `src_leaf`'s histogram to `dst_leaf` without copying.
    ///
    /// Used by the subtraction trick: the parent's histogram becomes the
    /// larger child's, then the smaller child is subtracted out of it.
    pub fn move_to(&mut self, src_leaf: usize, dst_leaf: usize) {
        if self.is_enough {
            self.pool.swap(src_leaf, dst_leaf);
            return;
        }
        if self.mapper[src_leaf] < 0 {
            return;
        }
        let slot = self.mapper[src_leaf] as usize;
        self.mapper[src_leaf] = -1;
        self.mapper[dst_leaf] = slot as i32;
        self.inverse_mapper[slot] = dst_leaf as i32;
        self.cur_time += 1;
        self.last_used_time[slot] = self.cur_time;
    }

    #[inline]
    pub fn slot(&self, slot: usize) -> &[HistogramEntry] {
        &self.pool[slot]
    }

    #[inline]
    pub fn slot_mut(&mut self, slot: usize) -> &mut [HistogramEntry] {
        &mut self.pool[slot]
    }

    /// One feature's histogram within a slot.
    #[inline]
    pub fn feature_histogram(&self, slot: usize, feature: usize) -> &[HistogramEntry] {
        &self.pool[slot][self.offsets[feature]..self.offsets[feature + 1]]
    }

    /// Subtract the child slot from the parent slot in place.
    pub fn subtract(&mut self, parent_slot: usize, child_slot: usize) {
        debug_assert_ne!(parent_slot, child_slot);
        // Disjoint borrow of two slots.
        let (low, high) = (parent_slot.min(child_slot), parent_slot.max(child_slot));
        let (head, tail) = self.pool.split_at_mut(high);
        let (a, b) = (&mut head[low], &mut tail[0]);
        if parent_slot < child_slot {
            subtract_histogram(a, b);
        } else {
            subtract_histogram(b, a);
        }
    }

    #[inline]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    #[inline]
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size
    }
}
