// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Training/validation example representation
//!
//! An [`Example`] is a flat map of named JSON values with a designated set of
//! input keys; every field not marked as an input is a label. The optimizer
//! passes examples to the program executor (inputs) and to the metric
//! (labels vs. predicted fields), and binds them to steps as few-shot
//! demonstrations.
//!
//! Field storage is ordered (`BTreeMap`) so that anything derived from field
//! iteration (dataset summaries, serialized demos) is stable across runs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A single input/output record.
///
/// # Example
///
/// ```rust
/// use dashtune::Example;
///
/// let example = Example::new()
///     .with_field("question", "What is 2+2?")
///     .with_field("answer", "4")
///     .with_inputs(&["question"]);
///
/// assert_eq!(example.inputs().len(), 1);
/// assert_eq!(example.labels().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Example {
    fields: BTreeMap<String, serde_json::Value>,
    input_keys: BTreeSet<String>,
}

impl Example {
    /// Create an empty example.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named field. Later writes to the same key overwrite.
    #[must_use]
    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Mark the given keys as input fields; every other field is a label.
    #[must_use]
    pub fn with_inputs(mut self, keys: &[&str]) -> Self {
        self.input_keys = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    /// Look up a field by name.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Look up a string field by name, returning `None` for non-string values.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }

    /// All fields, in key order.
    pub fn fields(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.fields
    }

    /// The keys marked as inputs.
    pub fn input_keys(&self) -> &BTreeSet<String> {
        &self.input_keys
    }

    /// The input portion of this example, in key order.
    pub fn inputs(&self) -> BTreeMap<String, serde_json::Value> {
        self.fields
            .iter()
            .filter(|(k, _)| self.input_keys.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The label portion of this example (every field not marked as input).
    pub fn labels(&self) -> BTreeMap<String, serde_json::Value> {
        self.fields
            .iter()
            .filter(|(k, _)| !self.input_keys.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the example has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
