// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Optimizer telemetry
//!
//! Structured tracing events fired at run milestones, plus the
//! [`OptimizerMetrics`] accumulator the search driver carries through a run
//! and attaches to the final report. Events are fire-and-forget; nothing in
//! the search reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Record the start of an optimization run.
pub fn record_optimization_start(optimizer: &str) {
    tracing::info!(optimizer = %optimizer, "Optimization started");
}

/// Record one completed trial of the search loop.
pub fn record_iteration(optimizer: &str) {
    tracing::debug!(optimizer = %optimizer, "Trial recorded");
}

/// Record one candidate program evaluation.
pub fn record_candidate_evaluated(optimizer: &str) {
    tracing::debug!(optimizer = %optimizer, "Candidate evaluated");
}

/// Record a full-validation-set evaluation (baseline, reconciliation, or
/// final confirmation).
pub fn record_full_evaluation(optimizer: &str, score: f64) {
    tracing::debug!(
        optimizer = %optimizer,
        score = %format!("{:.4}", score),
        "Full evaluation complete"
    );
}

/// Record a trial-scoped failure the run recovered from.
pub fn record_error(optimizer: &str, context: &str) {
    tracing::warn!(optimizer = %optimizer, context = %context, "Optimizer error");
}

/// Record the completion of an optimization run.
pub fn record_optimization_complete(
    optimizer: &str,
    iterations: u64,
    candidates: u64,
    initial_score: f64,
    final_score: f64,
    duration_secs: f64,
) {
    tracing::info!(
        optimizer = %optimizer,
        iterations,
        candidates,
        initial_score = %format!("{:.4}", initial_score),
        final_score = %format!("{:.4}", final_score),
        improvement = %format!("{:.4}", final_score - initial_score),
        duration_secs = %format!("{:.2}", duration_secs),
        "Optimization complete"
    );
}

/// Counters and timing for one optimization run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerMetrics {
    /// Trials executed (including failed ones).
    pub trials_run: usize,
    /// Full-validation-set evaluations, including the baseline and the
    /// final confirmation.
    pub full_evaluations: usize,
    /// Minibatch evaluations.
    pub minibatch_evaluations: usize,
    /// Trials that failed (budget exceeded or fatal step errors).
    pub failed_trials: usize,
    /// Program invocations across all evaluations (one per example).
    pub program_invocations: usize,
    /// Per-example failures recovered inside evaluations.
    pub example_failures: usize,
    /// Wall-clock start of the run.
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock end of the run.
    pub completed_at: Option<DateTime<Utc>>,
    /// Total run duration in seconds.
    pub duration_secs: f64,
}

impl OptimizerMetrics {
    /// Metrics for a run starting now.
    #[must_use]
    pub fn start() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Record one evaluation: `full` marks full-set vs minibatch,
    /// `examples` is the number of program invocations it made.
    pub fn record_evaluation(&mut self, full: bool, examples: usize) {
        if full {
            self.full_evaluations += 1;
        } else {
            self.minibatch_evaluations += 1;
        }
        self.program_invocations += examples;
    }

    /// Record one completed trial.
    pub fn record_trial(&mut self, failed: bool) {
        self.trials_run += 1;
        if failed {
            self.failed_trials += 1;
        }
    }

    /// Record per-example failures recovered inside one evaluation.
    pub fn record_example_failures(&mut self, count: usize) {
        self.example_failures += count;
    }

    /// Close out the run with its measured duration.
    pub fn complete(&mut self, duration: Duration) {
        self.completed_at = Some(Utc::now());
        self.duration_secs = duration.as_secs_f64();
    }

    /// Total evaluations of either kind.
    pub fn total_evaluations(&self) -> usize {
        self.full_evaluations + self.minibatch_evaluations
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_accumulation() {
        let mut metrics = OptimizerMetrics::start();
        assert!(metrics.started_at.is_some());

        metrics.record_evaluation(true, 20);
        metrics.record_evaluation(false, 5);
        metrics.record_evaluation(false, 5);
        metrics.record_trial(false);
        metrics.record_trial(true);
        metrics.record_example_failures(3);

        assert_eq!(metrics.full_evaluations, 1);
        assert_eq!(metrics.minibatch_evaluations, 2);
        assert_eq!(metrics.total_evaluations(), 3);
        assert_eq!(metrics.program_invocations, 30);
        assert_eq!(metrics.trials_run, 2);
        assert_eq!(metrics.failed_trials, 1);
        assert_eq!(metrics.example_failures, 3);
    }

    #[test]
    fn test_metrics_complete() {
        let mut metrics = OptimizerMetrics::start();
        metrics.complete(Duration::from_millis(2500));
        assert!(metrics.completed_at.is_some());
        assert_eq!(metrics.duration_secs, 2.5);
    }

    #[test]
    fn test_record_functions_do_not_panic() {
        record_optimization_start("mipro_v2");
        record_iteration("mipro_v2");
        record_candidate_evaluated("mipro_v2");
        record_full_evaluation("mipro_v2", 0.75);
        record_error("mipro_v2", "trial 3 budget exceeded");
        record_optimization_complete("mipro_v2", 10, 12, 0.5, 0.8, 4.2);
    }
}
