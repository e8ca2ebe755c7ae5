// src/descriptor/label.rs

//! Labels attached to components, providers and elements
//!
//! A label is a named JSON value. Signing labels participate in the
//! normalised descriptor digest and are immutable once signed; all other
//! labels are volatile and may be changed by later transfers or merged
//! with a target's copy through a declared merge algorithm.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a label value merge algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeAlgorithmSpec {
    /// Registered algorithm name (`default`, `simpleMapMerge`, ...)
    pub algorithm: String,
    /// Algorithm specific configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl MergeAlgorithmSpec {
    /// Create a spec without configuration
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            config: None,
        }
    }

    /// Attach a configuration value
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }
}

/// A single named label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub name: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub signing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeAlgorithmSpec>,
}

impl Label {
    /// Create a volatile label
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            version: None,
            signing: false,
            merge: None,
        }
    }

    /// Create a signing label
    pub fn signing(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            signing: true,
            ..Self::new(name, value)
        }
    }

    /// Declare the merge algorithm used when source and target both carry this label
    pub fn with_merge(mut self, merge: MergeAlgorithmSpec) -> Self {
        self.merge = Some(merge);
        self
    }
}

/// Ordered label list with unique names
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a label by name
    pub fn get(&self, name: &str) -> Option<&Label> {
        self.0.iter().find(|l| l.name == name)
    }

    /// Look up a label for in-place modification
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Label> {
        self.0.iter_mut().find(|l| l.name == name)
    }

    /// Insert or replace a label, keeping the position of a replaced one
    pub fn set(&mut self, label: Label) {
        match self.get_mut(&label.name) {
            Some(existing) => *existing = label,
            None => self.0.push(label),
        }
    }

    /// Remove a label by name, returning whether it existed
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|l| l.name != name);
        before != self.0.len()
    }

    /// Iterate labels in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    /// Signing labels only
    pub fn signing(&self) -> impl Iterator<Item = &Label> {
        self.0.iter().filter(|l| l.signing)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names appearing more than once
    pub fn duplicates(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.0
            .iter()
            .filter(|l| !seen.insert(l.name.as_str()))
            .map(|l| l.name.as_str())
            .collect()
    }
}

impl From<Vec<Label>> for Labels {
    fn from(labels: Vec<Label>) -> Self {
        let mut list = Labels::new();
        for label in labels {
            list.set(label);
        }
        list
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
