// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

// Allow clippy warnings for the evaluation module:
// - clone_on_ref_ptr: parallel scoring clones Arc handles into each task
#![allow(clippy::clone_on_ref_ptr)]

//! Program evaluation against example sets.
//!
//! The [`Evaluator`] runs a configured [`Program`] over a slice of examples
//! through a [`ProgramExecutor`], applies the metric to each prediction, and
//! returns the mean score. Example-level scoring is parallel with a bounded
//! concurrency level; individual example failures are recovered according to
//! a [`FailureScorePolicy`] until they exceed `max_errors`, at which point
//! the whole evaluation fails with [`Error::EvaluationBudget`].
//!
//! The evaluator holds no cross-call state. Each call wraps every program
//! invocation in module start/end callback events so instrumentation can
//! correlate nested model calls through the [`InvocationContext`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::callbacks::{InvocationContext, InvocationKind};
use crate::error::{Error, Result};
use crate::example::Example;
use crate::metrics::MetricFn;
use crate::program::Program;

/// Default bound on concurrently executing example evaluations.
pub const DEFAULT_NUM_THREADS: usize = 8;

/// Default number of per-example failures tolerated within one evaluation.
pub const DEFAULT_MAX_ERRORS: usize = 10;

/// Executes one forward pass of a program for a single input example.
///
/// This is the boundary to the language-model execution layer. The optimizer
/// never inspects how a program runs; it only needs predictions to score.
/// Implementations receive the child [`InvocationContext`] for the
/// surrounding module invocation and should tag any model-invocation events
/// they emit with it.
#[async_trait]
pub trait ProgramExecutor: Send + Sync {
    /// Run `program` on `input`, returning the predicted output fields.
    async fn call(
        &self,
        program: &Program,
        input: &Example,
        ctx: &InvocationContext,
    ) -> Result<Example>;
}

/// How a recovered per-example failure contributes to the mean score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureScorePolicy {
    /// Failed examples score 0.0 and stay in the denominator.
    #[default]
    ZeroScore,
    /// Failed examples are dropped from the mean entirely.
    Exclude,
}

/// Result of evaluating one program over one example set.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    /// Mean metric score over the example set.
    pub score: f64,
    /// Per-example scores that entered the mean, in no particular order.
    pub scores: Vec<f64>,
    /// Examples that failed (execution or metric error) and were recovered.
    pub failures: usize,
    /// Total examples attempted, one program invocation each.
    pub examples: usize,
}

/// Scores configured programs against example sets through a metric.
pub struct Evaluator {
    executor: Arc<dyn ProgramExecutor>,
    metric: MetricFn,
    num_threads: usize,
    max_errors: usize,
    failure_policy: FailureScorePolicy,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("num_threads", &self.num_threads)
            .field("max_errors", &self.max_errors)
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}

impl Evaluator {
    /// Create an evaluator with default concurrency and error budget.
    #[must_use]
    pub fn new(executor: Arc<dyn ProgramExecutor>, metric: MetricFn) -> Self {
        Self {
            executor,
            metric,
            num_threads: DEFAULT_NUM_THREADS,
            max_errors: DEFAULT_MAX_ERRORS,
            failure_policy: FailureScorePolicy::default(),
        }
    }

    /// Set the bound on concurrently executing examples (clamped to >= 1).
    #[must_use]
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    /// Set the number of per-example failures tolerated per evaluation.
    #[must_use]
    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }

    /// Set how recovered failures contribute to the mean.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailureScorePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Evaluate `program` over `examples`, returning the mean metric score.
    ///
    /// Individual example failures are logged and recovered per the failure
    /// policy. The call fails with [`Error::EvaluationBudget`] once failures
    /// exceed `max_errors`, and never partially: the outcome either covers
    /// every example or the error names how many failed.
    pub async fn evaluate(
        &self,
        program: &Program,
        examples: &[Example],
        ctx: &InvocationContext,
    ) -> Result<EvaluationOutcome> {
        if examples.is_empty() {
            tracing::warn!("Empty example set for evaluation, returning zero score");
            return Ok(EvaluationOutcome {
                score: 0.0,
                scores: Vec::new(),
                failures: 0,
                examples: 0,
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.num_threads));

        let tasks: Vec<_> = examples
            .iter()
            .enumerate()
            .map(|(idx, example)| {
                let sem = semaphore.clone();
                let executor = self.executor.clone();
                let metric = self.metric.clone();
                let example = example.clone();
                let program = program.clone();
                let ctx = ctx.clone();
                async move {
                    // The semaphore lives for this call and is never closed.
                    let result = match sem.acquire().await {
                        Ok(_permit) => {
                            score_example(&*executor, &metric, &program, &example, &ctx).await
                        }
                        Err(_) => Err(Error::Generic("Evaluation semaphore closed".to_string())),
                    };
                    (idx, result)
                }
            })
            .collect();

        let results: Vec<(usize, Result<f64>)> = stream::iter(tasks)
            .buffer_unordered(self.num_threads)
            .collect()
            .await;

        let mut scores = Vec::with_capacity(examples.len());
        let mut failures = 0usize;
        for (idx, result) in results {
            match result {
                Ok(score) => scores.push(score),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        example = idx,
                        error = %e,
                        "Example evaluation failed"
                    );
                    if self.failure_policy == FailureScorePolicy::ZeroScore {
                        scores.push(0.0);
                    }
                }
            }
        }

        if failures > self.max_errors {
            return Err(Error::EvaluationBudget {
                failures,
                evaluated: examples.len(),
                max_errors: self.max_errors,
            });
        }

        let score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };

        Ok(EvaluationOutcome {
            score,
            scores,
            failures,
            examples: examples.len(),
        })
    }
}

/// Run one example through the program and apply the metric, wrapped in
/// module-invocation callback events.
async fn score_example(
    executor: &dyn ProgramExecutor,
    metric: &MetricFn,
    program: &Program,
    example: &Example,
    ctx: &InvocationContext,
) -> Result<f64> {
    let run_id = Uuid::new_v4();
    let inputs: HashMap<String, serde_json::Value> = example.inputs().into_iter().collect();

    ctx.callbacks
        .on_start(
            InvocationKind::Module,
            "program",
            &inputs,
            run_id,
            ctx.parent_run_id,
        )
        .await?;

    let child = ctx.child(run_id);
    let result = executor.call(program, example, &child).await;

    match &result {
        Ok(prediction) => {
            let outputs: HashMap<String, serde_json::Value> = prediction
                .fields()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            ctx.callbacks
                .on_end(
                    InvocationKind::Module,
                    &outputs,
                    None,
                    run_id,
                    ctx.parent_run_id,
                )
                .await?;
        }
        Err(e) => {
            ctx.callbacks
                .on_end(
                    InvocationKind::Module,
                    &HashMap::new(),
                    Some(&e.to_string()),
                    run_id,
                    ctx.parent_run_id,
                )
                .await?;
        }
    }

    let prediction = result?;
    (metric)(example, &prediction)
}
