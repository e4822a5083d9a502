//! Row partitioning for tree training.
//!
//! [`DataPartition`] keeps a single permutation of the bagged row indices,
//! segmented by leaf: `indices[leaf_begin[l] .. leaf_begin[l] + leaf_count[l]]`
//! are the rows currently sitting in leaf `l`. A split rearranges exactly the
//! split leaf's segment, in place, in O(rows-in-leaf).
//!
//! ```text
//! Initial (all rows in leaf 0):
//!   indices: [0, 1, 2, 3, 4, 5, 6, 7]
//!   leaf_begin: [0], leaf_count: [8]
//!
//! After splitting leaf 0 (even rows left, odd rows right into leaf 1):
//!   indices: [0, 2, 4, 6, 1, 3, 5, 7]
//!   leaf_begin: [0, 4], leaf_count: [4, 4]
//! ```
//!
//! The split is parallelized over fixed-size chunks of the leaf segment;
//! per-chunk left/right runs are concatenated in chunk order, so the result
//! does not depend on the number of worker threads. Row order within each
//! side is not part of the contract.

use rayon::prelude::*;

/// Rows per parallel work unit during a split.
const SPLIT_CHUNK_SIZE: usize = 1024;

/// Leaf-segmented permutation of the bagged rows.
pub struct DataPartition {
    indices: Vec<u32>,
    leaf_begin: Vec<usize>,
    leaf_count: Vec<usize>,
    num_leaves: usize,
}

impl DataPartition {
    /// Create a partition able to hold `num_data` rows and `max_leaves` leaves.
    pub fn new(num_data: usize, max_leaves: usize) -> Self {
        Self {
            indices: (0..num_data as u32).collect(),
            leaf_begin: vec![0; max_leaves],
            leaf_count: vec![0; max_leaves],
            num_leaves: 0,
        }
    }

    /// Put all rows (or the bag) into leaf 0.
    pub fn init(&mut self, num_data: usize, bag: Option<&[u32]>) {
        self.leaf_begin.fill(0);
        self.leaf_count.fill(0);
        match bag {
            None => {
                self.indices.clear();
                self.indices.extend(0..num_data as u32);
            }
            Some(bag) => {
                self.indices.clear();
                self.indices.extend_from_slice(bag);
            }
        }
        self.leaf_count[0] = self.indices.len();
        self.num_leaves = 1;
    }

    /// Row indices currently in `leaf`.
    #[inline]
    pub fn leaf_indices(&self, leaf: usize) -> &[u32] {
        let begin = self.leaf_begin[leaf];
        &self.indices[begin..begin + self.leaf_count[leaf]]
    }

    #[inline]
    pub fn leaf_count(&self, leaf: usize) -> usize {
        self.leaf_count[leaf]
    }

    #[inline]
    pub fn leaf_begin(&self, leaf: usize) -> usize {
        self.leaf_begin[leaf]
    }

    #[inline]
    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    /// Number of rows across all leaves (the bag size).
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.indices.len()
    }

    /// Split `leaf` by a per-row mask; left-going rows stay in `leaf`, the
    /// rest move to `right_leaf`.
    ///
    /// `goes_left` is indexed by row id and must cover every row of the leaf.
    /// Returns `(left_count, right_count)`.
    pub fn split(&mut self, leaf: usize, right_leaf: usize, goes_left: &[bool]) -> (usize, usize) {
        let begin = self.leaf_begin[leaf];
        let count = self.leaf_count[leaf];
        let end = begin + count;

        // Per-chunk partitioning; chunk order fixes the final layout.
        let parts: Vec<(Vec<u32>, Vec<u32>)> = {
            let segment = &self.indices[begin..end];
            segment
                .par_chunks(SPLIT_CHUNK_SIZE)
                .map(|chunk| {
                    let mut left = Vec::with_capacity(chunk.len());
                    let mut right = Vec::new();
                    for &row in chunk {
                        if goes_left[row as usize] {
                            left.push(row);
                        } else {
                            right.push(row);
                        }
                    }
                    (left, right)
                })
                .collect()
        };

        let mut write = begin;
        for (left, _) in &parts {
            self.indices[write..write + left.len()].copy_from_slice(left);
            write += left.len();
        }
        let left_count = write - begin;
        for (_, right) in &parts {
            self.indices[write..write + right.len()].copy_from_slice(right);
            write += right.len();
        }
        debug_assert_eq!(write, end);

        self.leaf_count[leaf] = left_count;
        self.leaf_begin[right_leaf] = begin + left_count;
        self.leaf_count[right_leaf] = count - left_count;
        self.num_leaves = self.num_leaves.max(right_leaf + 1);

        (left_count, count - left_count)
    }
}
