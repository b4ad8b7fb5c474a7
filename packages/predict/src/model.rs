//! Regression forest exported as JSON.
//!
//! Trees are stored as flat node arrays. A split sends a sample left when
//! its feature value is `<=` the threshold. The forest prediction is the
//! mean over trees.
//!
//! ```json
//! {
//!   "feature_names": ["AMT", "AMP", "soil.classification=Luvisols"],
//!   "label_encoders": { "CROP_NAME": ["Durum wheat", "Soft wheat"] },
//!   "trees": [
//!     { "nodes": [
//!       { "split": { "feature": 0, "threshold": 15.0, "left": 1, "right": 2 } },
//!       { "leaf": { "value": 1.2 } },
//!       { "leaf": { "value": 0.8 } }
//!     ] }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::PredictError;

/// One tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    /// Internal node.
    Split {
        /// Index into [`TreeEnsemble::feature_names`].
        feature: usize,
        /// Go left when the value is `<=` this.
        threshold: f64,
        /// Left child index.
        left: usize,
        /// Right child index.
        right: usize,
    },
    /// Terminal node.
    Leaf {
        /// Predicted value.
        value: f64,
    },
}

/// A single regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    /// Nodes in export order.
    pub nodes: Vec<Node>,
}

/// A forest of regression trees over named features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    /// Model input columns in order.
    pub feature_names: Vec<String>,
    /// Label encoders by source column: a value's code is its index.
    #[serde(default)]
    pub label_encoders: BTreeMap<String, Vec<String>>,
    /// Trees to average.
    pub trees: Vec<Tree>,
}

/// Named feature values for one sample.
///
/// Features the model knows but the sample lacks are encoded as 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    values: BTreeMap<String, f64>,
}

impl Features {
    /// An empty sample.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a numeric feature.
    #[must_use]
    pub fn numeric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Sets the one-hot column `<name>=<value>`.
    #[must_use]
    pub fn categorical(mut self, name: &str, value: &str) -> Self {
        self.values.insert(format!("{name}={value}"), 1.0);
        self
    }

    /// Value of a feature, if set.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

impl TreeEnsemble {
    /// Parses and checks a model.
    ///
    /// # Errors
    ///
    /// * If the JSON does not describe a model
    /// * If the model has no trees or a node refers outside its tree
    pub fn from_json(json: &str) -> Result<Self, PredictError> {
        let model: Self = serde_json::from_str(json)?;
        model.check()?;
        Ok(model)
    }

    /// Loads a model file.
    ///
    /// # Errors
    ///
    /// * If the file cannot be read
    /// * If the contents are not a valid model
    pub fn load(path: &Path) -> Result<Self, PredictError> {
        let json = std::fs::read_to_string(path).map_err(|e| PredictError::ModelUnavailable {
            message: format!("{}: {e}", path.display()),
        })?;
        let model = Self::from_json(&json)?;
        log::info!(
            "Loaded model {} ({} trees, {} features)",
            path.display(),
            model.trees.len(),
            model.feature_names.len()
        );
        Ok(model)
    }

    fn check(&self) -> Result<(), PredictError> {
        if self.trees.is_empty() {
            return Err(PredictError::Data {
                message: "model has no trees".to_string(),
            });
        }

        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(PredictError::Data {
                    message: format!("tree {t} has no nodes"),
                });
            }
            for node in &tree.nodes {
                if let Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } = node
                    && (*feature >= self.feature_names.len()
                        || *left >= tree.nodes.len()
                        || *right >= tree.nodes.len())
                {
                    return Err(PredictError::Data {
                        message: format!("tree {t} has a split pointing outside the model"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Code of `value` in the label encoder for `column`, or `None` when
    /// the value was not seen in training.
    #[must_use]
    pub fn encode_label(&self, column: &str, value: &str) -> Option<usize> {
        self.label_encoders
            .get(column)?
            .iter()
            .position(|label| label == value)
    }

    /// Orders `features` as the model expects.
    #[must_use]
    pub fn feature_vector(&self, features: &Features) -> Vec<f64> {
        self.feature_names
            .iter()
            .map(|name| features.get(name).unwrap_or(0.0))
            .collect()
    }

    /// Predicts one sample.
    ///
    /// # Errors
    ///
    /// * If a tree walk does not reach a leaf
    pub fn predict(&self, features: &Features) -> Result<f64, PredictError> {
        let x = self.feature_vector(features);
        let total = self
            .trees
            .iter()
            .map(|tree| walk(tree, &x))
            .sum::<Result<f64, PredictError>>()?;

        #[allow(clippy::cast_precision_loss)]
        Ok(total / self.trees.len() as f64)
    }
}

fn walk(tree: &Tree, x: &[f64]) -> Result<f64, PredictError> {
    let mut index = 0;
    // A well-formed tree reaches a leaf in fewer steps than it has nodes.
    for _ in 0..=tree.nodes.len() {
        match tree.nodes.get(index) {
            Some(Node::Leaf { value }) => return Ok(*value),
            Some(Node::Split {
                feature,
                threshold,
                left,
                right,
            }) => {
                let value = x.get(*feature).copied().unwrap_or(0.0);
                index = if value <= *threshold { *left } else { *right };
            }
            None => break,
        }
    }

    Err(PredictError::Data {
        message: "tree walk did not reach a leaf".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUMPS: &str = r#"{
        "feature_names": ["x", "colour=red"],
        "trees": [
            { "nodes": [
                { "split": { "feature": 0, "threshold": 1.0, "left": 1, "right": 2 } },
                { "leaf": { "value": 10.0 } },
                { "leaf": { "value": 20.0 } }
            ] },
            { "nodes": [
                { "split": { "feature": 1, "threshold": 0.5, "left": 1, "right": 2 } },
                { "leaf": { "value": 0.0 } },
                { "leaf": { "value": 4.0 } }
            ] }
        ]
    }"#;

    #[test]
    fn averages_trees() {
        let model = TreeEnsemble::from_json(STUMPS).unwrap();
        let low = Features::new().numeric("x", 1.0);
        assert!((model.predict(&low).unwrap() - 5.0).abs() < 1e-12);

        let high_red = Features::new().numeric("x", 3.0).categorical("colour", "red");
        assert!((model.predict(&high_red).unwrap() - 12.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_category_encodes_as_zero() {
        let model = TreeEnsemble::from_json(STUMPS).unwrap();
        let blue = Features::new().numeric("x", 3.0).categorical("colour", "blue");
        assert_eq!(model.feature_vector(&blue), vec![3.0, 0.0]);
    }

    #[test]
    fn rejects_dangling_children() {
        let json = r#"{
            "feature_names": ["x"],
            "trees": [{ "nodes": [
                { "split": { "feature": 0, "threshold": 1.0, "left": 1, "right": 7 } },
                { "leaf": { "value": 1.0 } }
            ] }]
        }"#;
        assert!(matches!(
            TreeEnsemble::from_json(json),
            Err(PredictError::Data { .. })
        ));
    }

    #[test]
    fn cyclic_tree_does_not_hang() {
        let tree = Tree {
            nodes: vec![Node::Split {
                feature: 0,
                threshold: 1.0,
                left: 0,
                right: 0,
            }],
        };
        assert!(walk(&tree, &[0.0]).is_err());
    }

    #[test]
    fn label_encoding() {
        let json = r#"{
            "feature_names": ["CROP_NAME_ENCODED"],
            "label_encoders": { "CROP_NAME": ["Durum wheat", "Soft wheat"] },
            "trees": [{ "nodes": [{ "leaf": { "value": 1.0 } }] }]
        }"#;
        let model = TreeEnsemble::from_json(json).unwrap();
        assert_eq!(model.encode_label("CROP_NAME", "Soft wheat"), Some(1));
        assert_eq!(model.encode_label("CROP_NAME", "Barley"), None);
    }
}
