//! Decision tree produced by the tree learner.
//!
//! Array layout: a tree with `num_leaves` leaves has `num_leaves - 1`
//! internal nodes. Child pointers are internal node indices when
//! non-negative, otherwise `!leaf_index`. Leaf values carry the committed
//! output (after shrinkage); [`Tree::shrinkage`] rescales them, which DART
//! also uses with negative factors to flip contributions.

use crate::data::{BinIterator, Dataset};
use crate::error::{Error, Result};

/// A trained tree, immutable once the learner returns it.
#[derive(Clone, Debug)]
pub struct Tree {
    num_leaves: usize,
    // --- per internal node ---
    /// Used-feature index at the node (training dataset ordering).
    split_feature_inner: Vec<i32>,
    /// Raw input feature index at the node.
    split_feature: Vec<i32>,
    threshold_bin: Vec<u32>,
    /// Raw-value threshold reconstructed from the bin upper bound.
    threshold: Vec<f64>,
    /// 1 = categorical one-vs-rest, 0 = numerical `<=`.
    decision_type: Vec<u8>,
    split_gain: Vec<f64>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    // --- per leaf ---
    leaf_value: Vec<f64>,
    leaf_count: Vec<u32>,
    leaf_parent: Vec<i32>,
}

impl Tree {
    /// A tree holding a single leaf (the root) with output 0.
    pub fn new(max_leaves: usize) -> Self {
        let max_nodes = max_leaves.saturating_sub(1);
        let mut tree = Self {
            num_leaves: 1,
            split_feature_inner: Vec::with_capacity(max_nodes),
            split_feature: Vec::with_capacity(max_nodes),
            threshold_bin: Vec::with_capacity(max_nodes),
            threshold: Vec::with_capacity(max_nodes),
            decision_type: Vec::with_capacity(max_nodes),
            split_gain: Vec::with_capacity(max_nodes),
            left_child: Vec::with_capacity(max_nodes),
            right_child: Vec::with_capacity(max_nodes),
            leaf_value: Vec::with_capacity(max_leaves),
            leaf_count: Vec::with_capacity(max_leaves),
            leaf_parent: Vec::with_capacity(max_leaves),
        };
        tree.leaf_value.push(0.0);
        tree.leaf_count.push(0);
        tree.leaf_parent.push(-1);
        tree
    }

    #[inline]
    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    #[inline]
    pub fn leaf_value(&self, leaf: usize) -> f64 {
        self.leaf_value[leaf]
    }

    #[inline]
    pub fn leaf_count(&self, leaf: usize) -> u32 {
        self.leaf_count[leaf]
    }

    /// Raw feature index used by internal node `node`.
    #[inline]
    pub fn split_feature(&self, node: usize) -> i32 {
        self.split_feature[node]
    }

    /// Turn `leaf` into an internal node with two children.
    ///
    /// The left child keeps `leaf`'s index; the right child becomes leaf
    /// `num_leaves`. Returns the right child's leaf index.
    #[allow(clippy::too_many_arguments)]
    pub fn split(
        &mut self,
        leaf: usize,
        feature_inner: i32,
        feature_real: i32,
        threshold_bin: u32,
        threshold: f64,
        is_categorical: bool,
        gain: f64,
        left_value: f64,
        right_value: f64,
        left_count: u32,
        right_count: u32,
    ) -> usize {
        let new_node = (self.num_leaves - 1) as i32;
        let right_leaf = self.num_leaves;

        // Wire the new node where the leaf used to hang.
        let parent = self.leaf_parent[leaf];
        if parent >= 0 {
            let parent = parent as usize;
            if self.left_child[parent] == !(leaf as i32) {
                self.left_child[parent] = new_node;
            } else {
                self.right_child[parent] = new_node;
            }
        }

        self.split_feature_inner.push(feature_inner);
        self.split_feature.push(feature_real);
        self.threshold_bin.push(threshold_bin);
        self.threshold.push(threshold);
        self.decision_type.push(u8::from(is_categorical));
        self.split_gain.push(gain);
        self.left_child.push(!(leaf as i32));
        self.right_child.push(!(right_leaf as i32));

        self.leaf_value[leaf] = sanitize(left_value);
        self.leaf_count[leaf] = left_count;
        self.leaf_parent[leaf] = new_node;
        self.leaf_value.push(sanitize(right_value));
        self.leaf_count.push(right_count);
        self.leaf_parent.push(new_node);

        self.num_leaves += 1;
        right_leaf
    }

    /// Multiply every leaf output. Negative rates flip the tree's
    /// contribution, which the DART controller relies on.
    pub fn shrinkage(&mut self, rate: f64) {
        for value in &mut self.leaf_value {
            *value *= rate;
        }
    }

    #[inline]
    fn node_goes_left_value(&self, node: usize, value: f64) -> bool {
        if self.decision_type[node] != 0 {
            value == self.threshold[node]
        } else {
            value <= self.threshold[node]
        }
    }

    #[inline]
    fn node_goes_left_bin(&self, node: usize, bin: u32) -> bool {
        if self.decision_type[node] != 0 {
            bin == self.threshold_bin[node]
        } else {
            bin <= self.threshold_bin[node]
        }
    }

    /// Predict from raw feature values (length `>=` max feature index + 1).
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.leaf_value[self.predict_leaf_index(features) as usize]
    }

    /// Index of the leaf a raw row falls into.
    pub fn predict_leaf_index(&self, features: &[f64]) -> i32 {
        if self.num_leaves == 1 {
            return 0;
        }
        let mut node = 0i32;
        loop {
            let n = node as usize;
            let value = features
                .get(self.split_feature[n] as usize)
                .copied()
                .unwrap_or(0.0);
            node = if self.node_goes_left_value(n, value) {
                self.left_child[n]
            } else {
                self.right_child[n]
            };
            if node < 0 {
                return !node;
            }
        }
    }

    /// Add this tree's outputs to `score` for the given rows of a binned
    /// dataset (all rows when `rows` is `None`).
    ///
    /// Rows must be ascending: sparse columns are read through sequential
    /// iterators.
    pub fn add_prediction_to_score(
        &self,
        dataset: &Dataset,
        rows: Option<&[u32]>,
        score: &mut [f64],
    ) {
        let mut iterators: Vec<BinIterator<'_>> = dataset
            .features()
            .iter()
            .map(|f| f.bin_iterator())
            .collect();

        let mut apply = |row: usize, score: &mut [f64]| {
            let mut node = 0i32;
            if self.num_leaves > 1 {
                loop {
                    let n = node as usize;
                    let bin = iterators[self.split_feature_inner[n] as usize].get(row);
                    node = if self.node_goes_left_bin(n, bin) {
                        self.left_child[n]
                    } else {
                        self.right_child[n]
                    };
                    if node < 0 {
                        break;
                    }
                }
                score[row] += self.leaf_value[!node as usize];
            } else {
                score[row] += self.leaf_value[0];
            }
        };

        match rows {
            None => {
                for row in 0..dataset.num_data() {
                    apply(row, score);
                }
            }
            Some(rows) => {
                debug_assert!(rows.windows(2).all(|w| w[0] < w[1]));
                for &row in rows {
                    apply(row as usize, score);
                }
            }
        }
    }

    // =========================================================================
    // Text round-trip
    // =========================================================================

    /// Serialize as the line-oriented `Tree=` record body.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("num_leaves={}\n", self.num_leaves));
        push_line(&mut out, "split_feature", &self.split_feature);
        push_line(&mut out, "split_feature_inner", &self.split_feature_inner);
        push_line(&mut out, "threshold_bin", &self.threshold_bin);
        push_line(&mut out, "threshold", &self.threshold);
        push_line(&mut out, "decision_type", &self.decision_type);
        push_line(&mut out, "split_gain", &self.split_gain);
        push_line(&mut out, "left_child", &self.left_child);
        push_line(&mut out, "right_child", &self.right_child);
        push_line(&mut out, "leaf_value", &self.leaf_value);
        push_line(&mut out, "leaf_count", &self.leaf_count);
        push_line(&mut out, "leaf_parent", &self.leaf_parent);
        out
    }

    /// Parse a `Tree=` record body produced by [`Tree::to_text`].
    pub fn from_text(text: &str) -> Result<Self> {
        let mut fields = std::collections::HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::ModelFormat(format!("expected key=value, got '{}'", line)))?;
            fields.insert(key.to_string(), value.to_string());
        }
        let num_leaves: usize = parse_scalar(&fields, "num_leaves")?;
        if num_leaves == 0 {
            return Err(Error::ModelFormat("tree with zero leaves".into()));
        }

        let tree = Self {
            num_leaves,
            split_feature: parse_list(&fields, "split_feature", num_leaves - 1)?,
            split_feature_inner: parse_list(&fields, "split_feature_inner", num_leaves - 1)?,
            threshold_bin: parse_list(&fields, "threshold_bin", num_leaves - 1)?,
            threshold: parse_list(&fields, "threshold", num_leaves - 1)?,
            decision_type: parse_list(&fields, "decision_type", num_leaves - 1)?,
            split_gain: parse_list(&fields, "split_gain", num_leaves - 1)?,
            left_child: parse_list(&fields, "left_child", num_leaves - 1)?,
            right_child: parse_list(&fields, "right_child", num_leaves - 1)?,
            leaf_value: parse_list(&fields, "leaf_value", num_leaves)?,
            leaf_count: parse_list(&fields, "leaf_count", num_leaves)?,
            leaf_parent: parse_list(&fields, "leaf_parent", num_leaves)?,
        };
        Ok(tree)
    }
}

/// Zero out non-finite leaf outputs.
#[inline]
fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn push_line<T: std::fmt::Display>(out: &mut String, key: &str, values: &[T]) {
    out.push_str(key);
    out.push('=');
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&v.to_string());
    }
    out.push('\n');
}

fn parse_scalar<T: std::str::FromStr>(
    fields: &std::collections::HashMap<String, String>,
    key: &str,
) -> Result<T> {
    fields
        .get(key)
        .ok_or_else(|| Error::ModelFormat(format!("missing field {}", key)))?
        .trim()
        .parse()
        .map_err(|_| Error::ModelFormat(format!("cannot parse field {}", key)))
}

fn parse_list<T: std::str::FromStr>(
    fields: &std::collections::HashMap<String, String>,
    key: &str,
    expected: usize,
) -> Result<Vec<T>> {
    let raw = fields
        .get(key)
        .ok_or_else(|| Error::ModelFormat(format!("missing field {}", key)))?;
    let values: Vec<T> = raw
        .split_whitespace()
        .map(|v| {
            v.parse()
                .map_err(|_| Error::ModelFormat(format!("cannot parse field {}", key)))
        })
        .collect::<Result<_>>()?;
    if values.len() != expected {
        return Err(Error::ModelFormat(format!(
            "field {} has {} entries, expected {}",
            key,
            values.len(),
            expected
        )));
    }
    Ok(values)
}
