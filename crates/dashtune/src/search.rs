// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Budgeted search over instruction and demo-set assignments
//!
//! [`SearchStrategy`] is the capability interface the optimizer drives the
//! search through; [`TpeSearchDriver`] is the built-in implementation. One
//! run works through a fixed budget of trials: sample an assignment from the
//! acquisition model, configure the program, score it on the validation set
//! (full or minibatch), record the observation, repeat.
//!
//! Minibatch scores are cheap but noisy, so the driver never trusts them for
//! best-candidate bookkeeping. At a fixed interval, and always on the final
//! trial, it reconciles: the assignment with the highest mean minibatch score
//! that has not yet seen a full evaluation is re-scored on the whole
//! validation set, and only such full-set scores can update the best
//! program. The best score is therefore monotone in trial order and the
//! returned program is always backed by a full-set evaluation.
//!
//! Trial history accumulates monotonically; failed trials are kept with a
//! negative-infinity sentinel score and never enter best-candidate
//! consideration.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::callbacks::InvocationContext;
use crate::dataset::draw_minibatch;
use crate::error::{Error, Result};
use crate::evaluate::Evaluator;
use crate::example::Example;
use crate::program::{Assignment, CandidatePools, Program};
use crate::sampler::TpeSampler;
use crate::stats::{average_score, percentile, std_dev};
use crate::telemetry::{
    record_candidate_evaluated, record_error, record_full_evaluation, record_iteration,
    OptimizerMetrics,
};

/// How a trial's score was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalKind {
    /// Scored on the whole validation set.
    Full,
    /// Scored on a random validation subset of the given size.
    Minibatch {
        /// Examples in the drawn subset.
        size: usize,
    },
}

/// One evaluated assignment.
///
/// Trial 0 is the baseline (the student program as given). Reconciliation
/// evaluations share the index of the trial that triggered them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    /// Trial number within the run.
    pub index: usize,
    /// The assignment that was evaluated.
    pub assignment: Assignment,
    /// Observed score; `f64::NEG_INFINITY` when the trial failed.
    pub score: f64,
    /// Full-set or minibatch evaluation.
    pub eval: EvalKind,
    /// True if the evaluation failed and the score is a sentinel.
    pub failed: bool,
}

/// Distribution summary over the successful trial scores of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreSummary {
    /// Mean score.
    pub mean: f64,
    /// Sample standard deviation.
    pub std_dev: f64,
    /// Median score.
    pub median: f64,
    /// Lowest score.
    pub min: f64,
    /// Highest score.
    pub max: f64,
}

impl ScoreSummary {
    /// Summarize the non-failed trials. Empty input produces all zeros.
    #[must_use]
    pub fn from_trials(trials: &[Trial]) -> Self {
        let scores: Vec<f64> = trials
            .iter()
            .filter(|t| !t.failed)
            .map(|t| t.score)
            .collect();
        if scores.is_empty() {
            return Self::default();
        }
        Self {
            mean: average_score(&scores),
            std_dev: std_dev(&scores),
            median: percentile(&scores, 50.0),
            min: scores.iter().copied().fold(f64::INFINITY, f64::min),
            max: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Search budget and evaluation schedule.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Trials to run.
    pub num_trials: usize,
    /// Score trials on minibatches instead of the full validation set.
    pub minibatch: bool,
    /// Examples per minibatch.
    pub minibatch_size: usize,
    /// Reconcile with a full evaluation every this many trials.
    pub minibatch_full_eval_steps: usize,
    /// Seed for sampling and minibatch draws.
    pub seed: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            num_trials: 30,
            minibatch: true,
            minibatch_size: 25,
            minibatch_full_eval_steps: 10,
            seed: 9,
        }
    }
}

impl SearchConfig {
    /// Check the configuration against the validation set it will score on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] before any evaluation runs if the
    /// budget is empty, the validation set is empty, or the minibatch
    /// schedule is unsatisfiable.
    pub fn validate(&self, valset_len: usize) -> Result<()> {
        if self.num_trials == 0 {
            return Err(Error::Configuration(
                "num_trials must be at least 1".to_string(),
            ));
        }
        if valset_len == 0 {
            return Err(Error::Configuration(
                "Validation set is empty".to_string(),
            ));
        }
        if self.minibatch {
            if self.minibatch_size == 0 {
                return Err(Error::Configuration(
                    "minibatch_size must be at least 1".to_string(),
                ));
            }
            if self.minibatch_full_eval_steps == 0 {
                return Err(Error::Configuration(
                    "minibatch_full_eval_steps must be at least 1".to_string(),
                ));
            }
            if self.minibatch_size > valset_len {
                return Err(Error::Configuration(format!(
                    "Minibatch size cannot exceed the size of the valset. Valset size: {valset_len}."
                )));
            }
        }
        Ok(())
    }
}

/// Result of one search run.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// The best configured program found, or the base program when no
    /// full evaluation succeeded.
    pub best_program: Program,
    /// The assignment behind `best_program`.
    pub best_assignment: Assignment,
    /// Full-set score of the best program; the sentinel when none succeeded.
    pub best_score: f64,
    /// Full-set score of the baseline (trial 0).
    pub baseline_score: f64,
    /// Complete trial history, in evaluation order.
    pub trials: Vec<Trial>,
}

/// The search capability the optimizer drives a run through.
///
/// A variant search is a different implementation of this trait, not a
/// different optimizer.
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    /// Run the budgeted search and return the best-found program.
    async fn optimize(
        &self,
        base: &Program,
        pools: &CandidatePools,
        evaluator: &Evaluator,
        valset: &[Example],
        ctx: &InvocationContext,
        metrics: &mut OptimizerMetrics,
    ) -> Result<SearchOutcome>;
}

/// Built-in strategy: TPE acquisition over the categorical assignment space
/// with minibatch reconciliation.
#[derive(Debug, Clone)]
pub struct TpeSearchDriver {
    config: SearchConfig,
}

impl TpeSearchDriver {
    /// Create a driver with the given schedule.
    #[must_use]
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    /// The configured schedule.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }
}

#[async_trait]
impl SearchStrategy for TpeSearchDriver {
    async fn optimize(
        &self,
        base: &Program,
        pools: &CandidatePools,
        evaluator: &Evaluator,
        valset: &[Example],
        ctx: &InvocationContext,
        metrics: &mut OptimizerMetrics,
    ) -> Result<SearchOutcome> {
        self.config.validate(valset.len())?;
        if base.is_empty() {
            return Err(Error::Configuration(
                "Cannot optimize a program with no steps".to_string(),
            ));
        }

        let run = SearchRun {
            config: &self.config,
            base,
            pools,
            evaluator,
            valset,
            ctx,
            sampler: TpeSampler::new(pools.dimensions(), self.config.seed)?,
            batch_rng: StdRng::seed_from_u64(self.config.seed.wrapping_add(1)),
            trials: Vec::new(),
            full_scores: HashMap::new(),
            batch_stats: HashMap::new(),
            best: None,
        };
        run.run(metrics).await
    }
}

/// Running mean of an assignment's minibatch scores.
struct BatchStat {
    sum: f64,
    count: usize,
    first_trial: usize,
}

/// The best full-set-confirmed candidate so far.
struct BestCandidate {
    assignment: Assignment,
    score: f64,
    program: Program,
}

/// State for one search run. Trials are strictly sequential; the only
/// concurrency lives inside the evaluator.
struct SearchRun<'a> {
    config: &'a SearchConfig,
    base: &'a Program,
    pools: &'a CandidatePools,
    evaluator: &'a Evaluator,
    valset: &'a [Example],
    ctx: &'a InvocationContext,
    sampler: TpeSampler,
    batch_rng: StdRng,
    trials: Vec<Trial>,
    full_scores: HashMap<Vec<usize>, f64>,
    batch_stats: HashMap<Vec<usize>, BatchStat>,
    best: Option<BestCandidate>,
}

impl SearchRun<'_> {
    async fn run(mut self, metrics: &mut OptimizerMetrics) -> Result<SearchOutcome> {
        tracing::info!(
            num_trials = self.config.num_trials,
            minibatch = self.config.minibatch,
            space_size = self.pools.space_size(),
            valset = self.valset.len(),
            "Starting prompt parameter search"
        );

        let baseline = Assignment::baseline(self.base.len());
        let baseline_score = self.evaluate_baseline(&baseline, metrics).await?;

        for t in 1..=self.config.num_trials {
            record_iteration("mipro_v2");
            self.run_trial(t, metrics).await?;

            if self.config.minibatch
                && (t % self.config.minibatch_full_eval_steps == 0
                    || t == self.config.num_trials)
            {
                self.reconcile(t, metrics).await?;
            }
        }

        let (best_program, best_assignment, best_score) = match self.best {
            Some(best) => (best.program, best.assignment, best.score),
            // No full evaluation ever succeeded; hand back the student
            // program unchanged.
            None => (self.base.clone(), baseline, baseline_score),
        };

        tracing::info!(
            best_score = %format!("{:.4}", best_score),
            baseline_score = %format!("{:.4}", baseline_score),
            improvement = %format!("{:.4}", best_score - baseline_score),
            trials = self.trials.len(),
            "Search complete"
        );

        Ok(SearchOutcome {
            best_program,
            best_assignment,
            best_score,
            baseline_score,
            trials: self.trials,
        })
    }

    /// Score the student program as given on the full validation set. The
    /// result seeds both the acquisition model and the best-candidate
    /// tracking, so the run can never return something worse than the input.
    async fn evaluate_baseline(
        &mut self,
        baseline: &Assignment,
        metrics: &mut OptimizerMetrics,
    ) -> Result<f64> {
        let values = baseline.to_flat();
        let program = self.pools.configure(self.base, baseline)?;

        match self.evaluator.evaluate(&program, self.valset, self.ctx).await {
            Ok(outcome) => {
                metrics.record_evaluation(true, outcome.examples);
                metrics.record_example_failures(outcome.failures);
                record_full_evaluation("mipro_v2", outcome.score);
                tracing::debug!(score = %format!("{:.4}", outcome.score), "Baseline score");

                self.sampler.record(values.clone(), outcome.score);
                self.full_scores.insert(values, outcome.score);
                self.trials.push(Trial {
                    index: 0,
                    assignment: baseline.clone(),
                    score: outcome.score,
                    eval: EvalKind::Full,
                    failed: false,
                });
                self.best = Some(BestCandidate {
                    assignment: baseline.clone(),
                    score: outcome.score,
                    program,
                });
                Ok(outcome.score)
            }
            Err(e) if e.is_trial_scoped() => {
                record_error("mipro_v2", "baseline evaluation failed");
                tracing::warn!(error = %e, "Baseline evaluation failed");

                self.sampler.record(values.clone(), f64::NEG_INFINITY);
                self.full_scores.insert(values, f64::NEG_INFINITY);
                self.trials.push(Trial {
                    index: 0,
                    assignment: baseline.clone(),
                    score: f64::NEG_INFINITY,
                    eval: EvalKind::Full,
                    failed: true,
                });
                Ok(f64::NEG_INFINITY)
            }
            Err(e) => Err(e),
        }
    }

    /// One trial: sample, configure, evaluate, record.
    async fn run_trial(&mut self, t: usize, metrics: &mut OptimizerMetrics) -> Result<()> {
        let values = self.sampler.sample();
        let assignment = Assignment::from_flat(&values)?;
        let program = self.pools.configure(self.base, &assignment)?;

        let batch;
        let (examples, eval) = if self.config.minibatch {
            batch = draw_minibatch(self.valset, self.config.minibatch_size, &mut self.batch_rng);
            (batch.as_slice(), EvalKind::Minibatch { size: batch.len() })
        } else {
            (self.valset, EvalKind::Full)
        };

        match self.evaluator.evaluate(&program, examples, self.ctx).await {
            Ok(outcome) => {
                metrics.record_trial(false);
                metrics.record_evaluation(matches!(eval, EvalKind::Full), outcome.examples);
                metrics.record_example_failures(outcome.failures);
                record_candidate_evaluated("mipro_v2");

                self.sampler.record(values.clone(), outcome.score);
                match eval {
                    EvalKind::Full => {
                        record_full_evaluation("mipro_v2", outcome.score);
                        self.full_scores.insert(values.clone(), outcome.score);
                        self.update_best(&assignment, outcome.score, program);
                    }
                    EvalKind::Minibatch { .. } => {
                        let stat = self
                            .batch_stats
                            .entry(values.clone())
                            .or_insert(BatchStat {
                                sum: 0.0,
                                count: 0,
                                first_trial: t,
                            });
                        stat.sum += outcome.score;
                        stat.count += 1;
                    }
                }

                let best_score = self.best.as_ref().map_or(f64::NEG_INFINITY, |b| b.score);
                tracing::debug!(
                    trial = t,
                    total_trials = self.config.num_trials,
                    score = %format!("{:.4}", outcome.score),
                    best_score = %format!("{:.4}", best_score),
                    "Trial result"
                );
                self.trials.push(Trial {
                    index: t,
                    assignment,
                    score: outcome.score,
                    eval,
                    failed: false,
                });
                Ok(())
            }
            Err(e) if e.is_trial_scoped() => {
                metrics.record_trial(true);
                record_error("mipro_v2", "trial evaluation failed");
                tracing::warn!(trial = t, error = %e, "Trial evaluation failed");

                self.sampler.record(values.clone(), f64::NEG_INFINITY);
                if matches!(eval, EvalKind::Full) {
                    self.full_scores.insert(values, f64::NEG_INFINITY);
                }
                self.trials.push(Trial {
                    index: t,
                    assignment,
                    score: f64::NEG_INFINITY,
                    eval,
                    failed: true,
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Re-evaluate the most promising minibatch-only candidate on the full
    /// validation set. A no-op when every observed candidate already has a
    /// full-set score.
    async fn reconcile(&mut self, t: usize, metrics: &mut OptimizerMetrics) -> Result<()> {
        let Some(values) = self.reconciliation_target() else {
            return Ok(());
        };
        let assignment = Assignment::from_flat(&values)?;
        let program = self.pools.configure(self.base, &assignment)?;

        match self.evaluator.evaluate(&program, self.valset, self.ctx).await {
            Ok(outcome) => {
                metrics.record_evaluation(true, outcome.examples);
                metrics.record_example_failures(outcome.failures);
                record_full_evaluation("mipro_v2", outcome.score);
                tracing::debug!(
                    trial = t,
                    score = %format!("{:.4}", outcome.score),
                    "Full evaluation of best candidate"
                );

                self.full_scores.insert(values, outcome.score);
                self.trials.push(Trial {
                    index: t,
                    assignment: assignment.clone(),
                    score: outcome.score,
                    eval: EvalKind::Full,
                    failed: false,
                });
                self.update_best(&assignment, outcome.score, program);
                Ok(())
            }
            Err(e) if e.is_trial_scoped() => {
                record_error("mipro_v2", "reconciliation evaluation failed");
                tracing::warn!(trial = t, error = %e, "Reconciliation evaluation failed");

                // The sentinel keeps this assignment out of future targets.
                self.full_scores.insert(values, f64::NEG_INFINITY);
                self.trials.push(Trial {
                    index: t,
                    assignment,
                    score: f64::NEG_INFINITY,
                    eval: EvalKind::Full,
                    failed: true,
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The assignment with the highest mean minibatch score that has not yet
    /// been scored on the full set. Ties go to the earliest-seen assignment;
    /// the comparison is total, so hash iteration order never matters.
    fn reconciliation_target(&self) -> Option<Vec<usize>> {
        let mut target: Option<(&Vec<usize>, f64, usize)> = None;
        for (values, stat) in &self.batch_stats {
            if self.full_scores.contains_key(values) {
                continue;
            }
            let mean = stat.sum / stat.count as f64;
            let better = match &target {
                None => true,
                Some((best_values, best_mean, best_first)) => {
                    match mean.total_cmp(best_mean) {
                        Ordering::Greater => true,
                        Ordering::Less => false,
                        Ordering::Equal => match stat.first_trial.cmp(best_first) {
                            Ordering::Less => true,
                            Ordering::Greater => false,
                            Ordering::Equal => values < *best_values,
                        },
                    }
                }
            };
            if better {
                target = Some((values, mean, stat.first_trial));
            }
        }
        target.map(|(values, _, _)| values.clone())
    }

    /// Promote a full-set-scored candidate if it beats the current best.
    fn update_best(&mut self, assignment: &Assignment, score: f64, program: Program) {
        if !score.is_finite() {
            return;
        }
        let improved = self.best.as_ref().map_or(true, |b| score > b.score);
        if improved {
            tracing::debug!("New best score!");
            self.best = Some(BestCandidate {
                assignment: assignment.clone(),
                score,
                program,
            });
        }
    }
}
