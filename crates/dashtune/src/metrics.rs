// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Scoring metrics
//!
//! The optimizer consumes a caller-supplied [`MetricFn`] comparing an
//! expected example against a predicted one. Helpers here cover the common
//! string-match case; anything richer (judges, task-specific scoring) lives
//! with the caller.

use crate::error::Result;
use crate::example::Example;
use std::sync::Arc;

/// Metric comparing an expected example against a prediction, returning a
/// score in `[0.0, 1.0]` by convention. An `Err` counts as a per-example
/// failure under the evaluator's failure policy.
pub type MetricFn = Arc<dyn Fn(&Example, &Example) -> Result<f64> + Send + Sync>;

/// Normalize text for comparison: trim, lowercase, collapse internal
/// whitespace runs to single spaces.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Exact match on normalized text: `1.0` on match, `0.0` otherwise.
pub fn exact_match(expected: &str, predicted: &str) -> f64 {
    if normalize_text(expected) == normalize_text(predicted) {
        1.0
    } else {
        0.0
    }
}

/// Exact match on one named field of two examples. Missing or non-string
/// fields score `0.0`.
pub fn field_exact_match(expected: &Example, predicted: &Example, field: &str) -> f64 {
    match (expected.get_str(field), predicted.get_str(field)) {
        (Some(e), Some(p)) => exact_match(e, p),
        _ => 0.0,
    }
}
