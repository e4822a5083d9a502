//! Line-oriented text model format.
//!
//! A model file starts with the boosting type (`gbdt` or `dart`), then the
//! header fields `num_class=`, `label_index=`, `max_feature_idx=` and
//! `sigmoid=`, a blank line, one `Tree=i` record per tree, and finally a
//! `feature importances:` section listing `name=count` pairs sorted by
//! descending split count. Files omitting `sigmoid=` are accepted: the value
//! defaults to -1, meaning no output transform.

use std::fs;

use crate::config::BoostingType;
use crate::error::{Error, Result};
use crate::tree::Tree;

/// Assemble the model text.
pub fn model_to_string(
    boosting_type: BoostingType,
    num_class: usize,
    label_index: usize,
    max_feature_idx: usize,
    sigmoid: f64,
    trees: &[Tree],
    feature_names: &[String],
) -> String {
    let mut out = String::new();
    out.push_str(boosting_type.as_str());
    out.push('\n');
    out.push_str(&format!("num_class={}\n", num_class));
    out.push_str(&format!("label_index={}\n", label_index));
    out.push_str(&format!("max_feature_idx={}\n", max_feature_idx));
    out.push_str(&format!("sigmoid={}\n", sigmoid));
    out.push('\n');
    for (i, tree) in trees.iter().enumerate() {
        out.push_str(&format!("Tree={}\n", i));
        out.push_str(&tree.to_text());
        out.push('\n');
    }
    out.push_str("\nfeature importances:\n");
    for (name, count) in feature_importance(trees, feature_names, max_feature_idx) {
        out.push_str(&format!("{}={}\n", name, count));
    }
    out
}

/// Split counts per raw feature, sorted by descending count (name ascending
/// on ties, for a stable file).
pub fn feature_importance(
    trees: &[Tree],
    feature_names: &[String],
    max_feature_idx: usize,
) -> Vec<(String, usize)> {
    let mut counts = vec![0usize; max_feature_idx + 1];
    for tree in trees {
        for node in 0..tree.num_leaves().saturating_sub(1) {
            let feature = tree.split_feature(node);
            if feature >= 0 && (feature as usize) < counts.len() {
                counts[feature as usize] += 1;
            }
        }
    }
    let mut pairs: Vec<(String, usize)> = counts
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let name = feature_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("Column_{}", i));
            (name, c)
        })
        .collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    pairs
}

// =============================================================================
// LoadedModel
// =============================================================================

/// A model parsed back from its text form; prediction-only.
pub struct LoadedModel {
    pub boosting_type: BoostingType,
    pub num_class: usize,
    pub label_index: usize,
    pub max_feature_idx: usize,
    /// Scaled sigmoid for the output transform; -1 means none.
    pub sigmoid: f64,
    pub trees: Vec<Tree>,
}

impl LoadedModel {
    pub fn from_file(path: &str) -> Result<Self> {
        Self::from_string(&fs::read_to_string(path)?)
    }

    pub fn from_string(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text.lines().collect();
        let boosting_type = match lines.first().map(|l| l.trim()) {
            Some("gbdt") => BoostingType::Gbdt,
            Some("dart") => BoostingType::Dart,
            other => {
                return Err(Error::ModelFormat(format!(
                    "unknown boosting type: {:?}",
                    other
                )))
            }
        };

        let find_header = |key: &str| -> Option<&str> {
            lines
                .iter()
                .find_map(|l| l.trim().strip_prefix(key).and_then(|v| v.strip_prefix('=')))
        };
        let num_class: usize = find_header("num_class")
            .ok_or_else(|| Error::ModelFormat("model file has no num_class".into()))?
            .trim()
            .parse()
            .map_err(|_| Error::ModelFormat("cannot parse num_class".into()))?;
        let label_index: usize = find_header("label_index")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        let max_feature_idx: usize = find_header("max_feature_idx")
            .ok_or_else(|| Error::ModelFormat("model file has no max_feature_idx".into()))?
            .trim()
            .parse()
            .map_err(|_| Error::ModelFormat("cannot parse max_feature_idx".into()))?;
        // Older files may omit the sigmoid line; treat as "no transform".
        let sigmoid: f64 = find_header("sigmoid")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(-1.0);

        let mut trees = Vec::new();
        let mut i = 0usize;
        while i < lines.len() {
            if lines[i].trim().starts_with("Tree=") {
                let start = i + 1;
                let mut end = start;
                while end < lines.len()
                    && !lines[end].trim().starts_with("Tree=")
                    && !lines[end].trim().starts_with("feature importances:")
                {
                    end += 1;
                }
                trees.push(Tree::from_text(&lines[start..end].join("\n"))?);
                i = end;
            } else {
                i += 1;
            }
        }
        if num_class == 0 || trees.len() % num_class != 0 {
            return Err(Error::ModelFormat(format!(
                "{} trees do not divide into {} classes",
                trees.len(),
                num_class
            )));
        }

        Ok(Self {
            boosting_type,
            num_class,
            label_index,
            max_feature_idx,
            sigmoid,
            trees,
        })
    }

    /// Iterations stored in the model.
    pub fn num_iterations(&self) -> usize {
        self.trees.len() / self.num_class
    }

    /// Raw scores, one per class.
    pub fn predict_raw(&self, features: &[f64]) -> Vec<f64> {
        predict_raw(&self.trees, self.num_class, self.num_iterations(), features)
    }

    /// Transformed output: sigmoid for binary (when `sigmoid > 0`), softmax
    /// for multiclass, raw otherwise.
    pub fn predict(&self, features: &[f64]) -> Vec<f64> {
        let mut raw = self.predict_raw(features);
        transform_output(&mut raw, self.num_class, self.sigmoid);
        raw
    }

    /// Leaf index in every used tree.
    pub fn predict_leaf_index(&self, features: &[f64]) -> Vec<i32> {
        self.trees
            .iter()
            .map(|t| t.predict_leaf_index(features))
            .collect()
    }
}

/// Sum tree outputs per class over the first `num_iterations` iterations.
pub fn predict_raw(
    trees: &[Tree],
    num_class: usize,
    num_iterations: usize,
    features: &[f64],
) -> Vec<f64> {
    let mut raw = vec![0.0; num_class];
    for iteration in 0..num_iterations {
        for (k, value) in raw.iter_mut().enumerate() {
            *value += trees[iteration * num_class + k].predict(features);
        }
    }
    raw
}

/// In-place output transform shared by live and loaded boosters.
pub fn transform_output(raw: &mut [f64], num_class: usize, sigmoid: f64) {
    if num_class > 1 {
        let row_max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut denom = 0.0;
        for value in raw.iter_mut() {
            *value = (*value - row_max).exp();
            denom += *value;
        }
        for value in raw.iter_mut() {
            *value /= denom;
        }
    } else if sigmoid > 0.0 {
        raw[0] = 1.0 / (1.0 + (-2.0 * sigmoid * raw[0]).exp());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_trees() -> Vec<Tree> {
        let mut tree_a = Tree::new(2);
        tree_a.split(0, 0, 0, 0, 0.5, false, 1.0, -1.0, 1.0, 2, 2);
        let mut tree_b = Tree::new(2);
        tree_b.split(0, 0, 1, 0, 2.5, false, 0.8, 0.25, -0.25, 2, 2);
        vec![tree_a, tree_b]
    }

    fn names() -> Vec<String> {
        vec!["f0".to_string(), "f1".to_string()]
    }

    #[test]
    fn test_round_trip_preserves_predictions() {
        let trees = two_trees();
        let text =
            model_to_string(BoostingType::Gbdt, 1, 0, 1, 1.0, &trees, &names());
        let loaded = LoadedModel::from_string(&text).unwrap();

        assert_eq!(loaded.num_class, 1);
        assert_eq!(loaded.trees.len(), 2);
        assert!((loaded.sigmoid - 1.0).abs() < 1e-12);

        for row in [[0.0, 0.0], [1.0, 3.0], [0.3, 2.5]] {
            let expected: f64 = trees.iter().map(|t| t.predict(&row)).sum();
            assert!((loaded.predict_raw(&row)[0] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_missing_sigmoid_defaults_to_none() {
        let trees = two_trees();
        let text =
            model_to_string(BoostingType::Gbdt, 1, 0, 1, 1.0, &trees, &names());
        let without: String = text
            .lines()
            .filter(|l| !l.starts_with("sigmoid="))
            .collect::<Vec<_>>()
            .join("\n");
        let loaded = LoadedModel::from_string(&without).unwrap();
        assert!((loaded.sigmoid + 1.0).abs() < 1e-12);
        // No transform applied.
        let raw = loaded.predict_raw(&[0.0, 0.0]);
        let transformed = loaded.predict(&[0.0, 0.0]);
        assert_eq!(raw, transformed);
    }

    #[test]
    fn test_feature_importance_sorted() {
        let trees = two_trees();
        let importance = feature_importance(&trees, &names(), 1);
        assert_eq!(importance.len(), 2);
        assert_eq!(importance[0].1, 1);
        assert_eq!(importance[1].1, 1);
        // Equal counts: name order.
        assert_eq!(importance[0].0, "f0");
    }

    #[test]
    fn test_importance_section_in_text() {
        let trees = two_trees();
        let text =
            model_to_string(BoostingType::Gbdt, 1, 0, 1, -1.0, &trees, &names());
        assert!(text.contains("feature importances:"));
        assert!(text.contains("f0=1"));
        assert!(text.contains("f1=1"));
        assert!(text.starts_with("gbdt\n"));
    }

    #[test]
    fn test_dart_header_round_trip() {
        let trees = two_trees();
        let text =
            model_to_string(BoostingType::Dart, 1, 0, 1, -1.0, &trees, &names());
        let loaded = LoadedModel::from_string(&text).unwrap();
        assert_eq!(loaded.boosting_type, BoostingType::Dart);
    }

    #[test]
    fn test_sigmoid_transform() {
        let mut raw = vec![0.0];
        transform_output(&mut raw, 1, 1.0);
        assert!((raw[0] - 0.5).abs() < 1e-12);

        let mut raw = vec![0.0, 0.0];
        transform_output(&mut raw, 2, -1.0);
        assert!((raw[0] - 0.5).abs() < 1e-12);
        assert!((raw[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_malformed_model_rejected() {
        assert!(LoadedModel::from_string("not_a_model\n").is_err());
        assert!(LoadedModel::from_string("gbdt\nmax_feature_idx=3\n").is_err());
    }
}
