// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # MIPROv2 - Multiprompt Instruction Proposal Optimizer v2
//!
//! MIPROv2 jointly optimizes the instruction text and the few-shot
//! demonstration set of every step in a multi-step LM program:
//! 1. **Demo bootstrapping**: run the student (or a teacher) program over the
//!    train split and keep traces the metric accepts, grouped into candidate
//!    demo sets per step
//! 2. **Instruction proposal**: generate candidate instructions per step,
//!    grounded in the program shape, data samples, and prompting tips
//! 3. **Bayesian search**: a TPE sampler walks the categorical space of
//!    `(instruction, demo set)` assignments under a fixed trial budget,
//!    scoring candidates on the validation split
//!
//! ## Algorithm Overview
//!
//! **Initialization:**
//! 1. Partition data into train/validation splits (train proposes, val scores)
//! 2. Build candidate pools; index 0 always reproduces the student program
//! 3. Score the baseline assignment on the full validation set
//!
//! **Per trial:**
//! 1. Sample an assignment from the acquisition model
//! 2. Score the configured program on a minibatch (or the full set)
//! 3. Record the observation; periodically confirm the best minibatch
//!    candidate with a full-set evaluation
//!
//! **Final Selection:**
//! - Return the candidate with the best *full-set* score; minibatch scores
//!   alone never decide the winner
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use dashtune::{AutoMode, MIPROv2};
//!
//! let optimizer = MIPROv2::builder()
//!     .metric(my_metric)
//!     .executor(my_executor)
//!     .auto(AutoMode::Light)
//!     .requires_permission_to_run(false)
//!     .build()?;
//!
//! let (optimized, report) = optimizer.compile(&student, &trainset, None).await?;
//! println!("{:.4} -> {:.4}", report.initial_score, report.final_score);
//! ```
//!
//! ## References
//!
//! - **Based on**: MIPROv2 (arxiv:2406.11695)
//! - **Link**: <https://arxiv.org/abs/2406.11695> (DSPy optimizer paper)

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::callbacks::{CallbackManager, InvocationContext};
use crate::dataset::{cap_examples, resolve_datasets, DEFAULT_VAL_RATIO};
use crate::demos::{
    BootstrapDemoGenerator, DemoCandidateGenerator, DEFAULT_MAX_BOOTSTRAPPED_DEMOS,
    DEFAULT_MAX_LABELED_DEMOS,
};
use crate::error::{Error, Result};
use crate::evaluate::{
    Evaluator, FailureScorePolicy, ProgramExecutor, DEFAULT_MAX_ERRORS, DEFAULT_NUM_THREADS,
};
use crate::example::Example;
use crate::metrics::MetricFn;
use crate::program::{Assignment, CandidatePools, Program};
use crate::propose::{GroundedProposer, InstructionProposer, ProposerOptions};
use crate::search::{ScoreSummary, SearchConfig, SearchStrategy, TpeSearchDriver, Trial};
use crate::telemetry::{record_optimization_complete, record_optimization_start, OptimizerMetrics};

/// Default trial budget when neither `num_trials` nor a run mode is set.
pub const DEFAULT_NUM_TRIALS: usize = 30;

/// Default number of instruction and demo-set candidates per step.
pub const DEFAULT_NUM_CANDIDATES: usize = 10;

/// Default minibatch size.
pub const DEFAULT_MINIBATCH_SIZE: usize = 25;

/// Default interval (in trials) between full-set reconciliations.
pub const DEFAULT_MINIBATCH_FULL_EVAL_STEPS: usize = 10;

/// Default seed for all randomized stages.
pub const DEFAULT_SEED: u64 = 9;

/// Run-mode presets that derive the candidate count, the trial budget, and a
/// cap on validation-set size. Explicit builder settings override the preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoMode {
    /// Quick pass: 6 candidates per step, validation capped at 100 examples.
    Light,
    /// Balanced run: 12 candidates per step, validation capped at 300.
    Medium,
    /// Thorough run: 18 candidates per step, validation capped at 1000.
    Heavy,
}

impl AutoMode {
    /// Instruction and demo-set candidates proposed per step.
    #[must_use]
    pub fn num_candidates(self) -> usize {
        match self {
            Self::Light => 6,
            Self::Medium => 12,
            Self::Heavy => 18,
        }
    }

    /// Largest validation set the preset will score against.
    #[must_use]
    pub fn valset_cap(self) -> usize {
        match self {
            Self::Light => 100,
            Self::Medium => 300,
            Self::Heavy => 1000,
        }
    }
}

/// Trial budget derived from a preset: `max(2 * num_vars * log2(n), 1.5 * n)`
/// where `num_vars` counts one categorical variable per step, doubled when
/// demo sets are in play.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn auto_num_trials(num_candidates: usize, num_vars: usize) -> usize {
    let n = num_candidates as f64;
    let trials = (2.0 * num_vars as f64 * n.log2()).max(1.5 * n);
    (trials as usize).max(1)
}

/// Evaluation volume implied by a run's budget, computed before any trial
/// executes. Counts are upper bounds: reconciliations are skipped when the
/// best candidate is already confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCostEstimate {
    /// Trials in the budget.
    pub num_trials: usize,
    /// Validation examples each full evaluation scores.
    pub valset_size: usize,
    /// Whether trials are minibatch-scored.
    pub minibatch: bool,
    /// Examples per minibatch evaluation.
    pub minibatch_size: usize,
    /// Full-set evaluations, including the baseline.
    pub full_evaluations: usize,
    /// Minibatch evaluations.
    pub minibatch_evaluations: usize,
    /// Metric calls implied by the above.
    pub total_metric_calls: usize,
}

/// Decides whether an optimization run may proceed given its cost estimate.
///
/// Consulted once per `compile` call, before any proposal, bootstrapping, or
/// evaluation work starts. Returning `false` aborts the run: the student
/// program comes back unchanged and no evaluator call is made.
pub trait ConfirmationGate: Send + Sync {
    /// Approve or decline the run.
    fn confirm(&self, estimate: &RunCostEstimate) -> bool;
}

/// Result summary of one `compile` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    /// Full-set score of the student program as given.
    pub initial_score: f64,
    /// Full-set score of the returned program.
    pub final_score: f64,
    /// Trials in the executed budget; 0 when the run was declined.
    pub iterations: usize,
    /// True when the run completed with a confirmed best candidate.
    pub converged: bool,
    /// Wall-clock duration of the whole compile call.
    pub duration_secs: f64,
    /// The winning assignment; `None` when the run was declined.
    pub best_assignment: Option<Assignment>,
    /// Distribution of successful trial scores.
    pub score_summary: ScoreSummary,
    /// Complete trial history.
    pub trials: Vec<Trial>,
    /// Evaluation counters for the run.
    pub metrics: OptimizerMetrics,
}

impl OptimizationReport {
    fn declined(metrics: OptimizerMetrics, duration: Duration) -> Self {
        Self {
            initial_score: 0.0,
            final_score: 0.0,
            iterations: 0,
            converged: false,
            duration_secs: duration.as_secs_f64(),
            best_assignment: None,
            score_summary: ScoreSummary::default(),
            trials: Vec::new(),
            metrics,
        }
    }
}

/// MIPROv2 optimizer builder
pub struct MIPROv2Builder {
    metric: Option<MetricFn>,
    executor: Option<Arc<dyn ProgramExecutor>>,
    proposer: Option<Arc<dyn InstructionProposer>>,
    demo_generator: Option<Arc<dyn DemoCandidateGenerator>>,
    strategy: Option<Arc<dyn SearchStrategy>>,
    confirmation: Option<Arc<dyn ConfirmationGate>>,
    callbacks: Option<CallbackManager>,
    teacher: Option<Program>,
    auto: Option<AutoMode>,
    num_candidates: Option<usize>,
    num_trials: Option<usize>,
    minibatch: Option<bool>,
    minibatch_size: Option<usize>,
    minibatch_full_eval_steps: Option<usize>,
    max_bootstrapped_demos: Option<usize>,
    max_labeled_demos: Option<usize>,
    metric_threshold: Option<f64>,
    num_threads: Option<usize>,
    max_errors: Option<usize>,
    seed: Option<u64>,
    val_ratio: Option<f64>,
    requires_permission_to_run: Option<bool>,
    failure_policy: Option<FailureScorePolicy>,
    program_aware: bool,
    data_aware: bool,
    tip_aware: bool,
    fewshot_aware: bool,
    view_data_batch_size: Option<usize>,
}

impl MIPROv2Builder {
    /// Create a new MIPROv2 optimizer builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metric: None,
            executor: None,
            proposer: None,
            demo_generator: None,
            strategy: None,
            confirmation: None,
            callbacks: None,
            teacher: None,
            auto: None,
            num_candidates: None,
            num_trials: None,
            minibatch: None,
            minibatch_size: None,
            minibatch_full_eval_steps: None,
            max_bootstrapped_demos: None,
            max_labeled_demos: None,
            metric_threshold: None,
            num_threads: None,
            max_errors: None,
            seed: None,
            val_ratio: None,
            requires_permission_to_run: None,
            failure_policy: None,
            program_aware: true,
            data_aware: true,
            tip_aware: true,
            fewshot_aware: true,
            view_data_batch_size: None,
        }
    }

    /// Set the metric scoring predictions against expected outputs. Required.
    #[must_use]
    pub fn metric(mut self, metric: MetricFn) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Set the executor running program forward passes. Required.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn ProgramExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replace the built-in instruction proposer.
    #[must_use]
    pub fn proposer(mut self, proposer: Arc<dyn InstructionProposer>) -> Self {
        self.proposer = Some(proposer);
        self
    }

    /// Replace the built-in bootstrap demo generator.
    #[must_use]
    pub fn demo_generator(mut self, generator: Arc<dyn DemoCandidateGenerator>) -> Self {
        self.demo_generator = Some(generator);
        self
    }

    /// Replace the built-in TPE search strategy.
    #[must_use]
    pub fn search_strategy(mut self, strategy: Arc<dyn SearchStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Install a pre-run confirmation gate.
    #[must_use]
    pub fn confirmation(mut self, gate: Arc<dyn ConfirmationGate>) -> Self {
        self.confirmation = Some(gate);
        self
    }

    /// Register invocation callbacks for the run.
    #[must_use]
    pub fn callbacks(mut self, callbacks: CallbackManager) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// Bootstrap demos by running this program instead of the student. Must
    /// have the same number of steps as the student.
    #[must_use]
    pub fn teacher(mut self, teacher: Program) -> Self {
        self.teacher = Some(teacher);
        self
    }

    /// Derive candidate count, trial budget, and valset cap from a preset.
    #[must_use]
    pub fn auto(mut self, mode: AutoMode) -> Self {
        self.auto = Some(mode);
        self
    }

    /// Set the number of instruction and demo-set candidates per step.
    #[must_use]
    pub fn num_candidates(mut self, num_candidates: usize) -> Self {
        self.num_candidates = Some(num_candidates);
        self
    }

    /// Set the trial budget.
    #[must_use]
    pub fn num_trials(mut self, num_trials: usize) -> Self {
        self.num_trials = Some(num_trials);
        self
    }

    /// Score trials on minibatches instead of the full validation set.
    #[must_use]
    pub fn minibatch(mut self, minibatch: bool) -> Self {
        self.minibatch = Some(minibatch);
        self
    }

    /// Set the number of examples per minibatch.
    #[must_use]
    pub fn minibatch_size(mut self, size: usize) -> Self {
        self.minibatch_size = Some(size);
        self
    }

    /// Set the interval (in trials) between full-set reconciliations.
    #[must_use]
    pub fn minibatch_full_eval_steps(mut self, steps: usize) -> Self {
        self.minibatch_full_eval_steps = Some(steps);
        self
    }

    /// Cap bootstrapped demos per set. Zero together with
    /// `max_labeled_demos(0)` selects zero-shot optimization.
    #[must_use]
    pub fn max_bootstrapped_demos(mut self, max: usize) -> Self {
        self.max_bootstrapped_demos = Some(max);
        self
    }

    /// Cap labeled demos per set.
    #[must_use]
    pub fn max_labeled_demos(mut self, max: usize) -> Self {
        self.max_labeled_demos = Some(max);
        self
    }

    /// Minimum metric score for a bootstrapped trace to become a demo.
    #[must_use]
    pub fn metric_threshold(mut self, threshold: f64) -> Self {
        self.metric_threshold = Some(threshold);
        self
    }

    /// Bound concurrent example evaluations.
    #[must_use]
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Per-evaluation failure budget before the evaluation itself fails.
    #[must_use]
    pub fn max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = Some(max_errors);
        self
    }

    /// Seed shared by sampling, splitting, and bootstrapping.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fraction of the trainset moved to validation when no valset is given.
    #[must_use]
    pub fn valset_ratio(mut self, ratio: f64) -> Self {
        self.val_ratio = Some(ratio);
        self
    }

    /// Consult the confirmation gate before running. Defaults to true; with
    /// no gate installed the run proceeds after logging its cost estimate.
    #[must_use]
    pub fn requires_permission_to_run(mut self, required: bool) -> Self {
        self.requires_permission_to_run = Some(required);
        self
    }

    /// How recovered per-example failures contribute to the mean score.
    #[must_use]
    pub fn failure_score_policy(mut self, policy: FailureScorePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    /// Let the proposer see the program structure.
    #[must_use]
    pub fn program_aware(mut self, enabled: bool) -> Self {
        self.program_aware = enabled;
        self
    }

    /// Let the proposer see a summary of the training data.
    #[must_use]
    pub fn data_aware(mut self, enabled: bool) -> Self {
        self.data_aware = enabled;
        self
    }

    /// Let the proposer vary candidates with prompting tips.
    #[must_use]
    pub fn tip_aware(mut self, enabled: bool) -> Self {
        self.tip_aware = enabled;
        self
    }

    /// Let the proposer see the bootstrapped demo candidates.
    #[must_use]
    pub fn fewshot_aware(mut self, enabled: bool) -> Self {
        self.fewshot_aware = enabled;
        self
    }

    /// Training examples shown to a data-aware proposer.
    #[must_use]
    pub fn view_data_batch_size(mut self, size: usize) -> Self {
        self.view_data_batch_size = Some(size);
        self
    }

    /// Build the MIPROv2 optimizer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the metric or executor is
    /// missing or a knob is out of range.
    pub fn build(self) -> Result<MIPROv2> {
        let metric = self
            .metric
            .ok_or_else(|| Error::Configuration("Metric is required".to_string()))?;
        let executor = self
            .executor
            .ok_or_else(|| Error::Configuration("Program executor is required".to_string()))?;

        if self.num_trials == Some(0) {
            return Err(Error::Configuration(
                "num_trials must be at least 1".to_string(),
            ));
        }
        if self.num_candidates == Some(0) {
            return Err(Error::Configuration(
                "num_candidates must be at least 1".to_string(),
            ));
        }
        if self.minibatch_size == Some(0) {
            return Err(Error::Configuration(
                "minibatch_size must be at least 1".to_string(),
            ));
        }
        if self.minibatch_full_eval_steps == Some(0) {
            return Err(Error::Configuration(
                "minibatch_full_eval_steps must be at least 1".to_string(),
            ));
        }
        let val_ratio = self.val_ratio.unwrap_or(DEFAULT_VAL_RATIO);
        if !(val_ratio > 0.0 && val_ratio < 1.0) {
            return Err(Error::Configuration(format!(
                "Validation ratio must be in (0, 1), got {val_ratio}"
            )));
        }

        let seed = self.seed.unwrap_or(DEFAULT_SEED);
        let max_bootstrapped_demos = self
            .max_bootstrapped_demos
            .unwrap_or(DEFAULT_MAX_BOOTSTRAPPED_DEMOS);
        let max_labeled_demos = self.max_labeled_demos.unwrap_or(DEFAULT_MAX_LABELED_DEMOS);

        let demo_generator = match self.demo_generator {
            Some(generator) => generator,
            None => {
                let mut generator =
                    BootstrapDemoGenerator::new(Arc::clone(&executor), Arc::clone(&metric))
                        .with_max_bootstrapped_demos(max_bootstrapped_demos)
                        .with_max_labeled_demos(max_labeled_demos)
                        .with_seed(seed);
                if let Some(threshold) = self.metric_threshold {
                    generator = generator.with_metric_threshold(threshold);
                }
                Arc::new(generator)
            }
        };
        let proposer = self
            .proposer
            .unwrap_or_else(|| Arc::new(GroundedProposer::new()));

        Ok(MIPROv2 {
            metric,
            executor,
            proposer,
            demo_generator,
            strategy: self.strategy,
            confirmation: self.confirmation,
            callbacks: self.callbacks.unwrap_or_default(),
            teacher: self.teacher,
            auto: self.auto,
            num_candidates: self.num_candidates,
            num_trials: self.num_trials,
            minibatch: self.minibatch.unwrap_or(true),
            minibatch_size: self.minibatch_size.unwrap_or(DEFAULT_MINIBATCH_SIZE),
            minibatch_full_eval_steps: self
                .minibatch_full_eval_steps
                .unwrap_or(DEFAULT_MINIBATCH_FULL_EVAL_STEPS),
            max_bootstrapped_demos,
            max_labeled_demos,
            num_threads: self.num_threads.unwrap_or(DEFAULT_NUM_THREADS).max(1),
            max_errors: self.max_errors.unwrap_or(DEFAULT_MAX_ERRORS),
            seed,
            val_ratio,
            requires_permission_to_run: self.requires_permission_to_run.unwrap_or(true),
            failure_policy: self.failure_policy.unwrap_or_default(),
            program_aware: self.program_aware,
            data_aware: self.data_aware,
            tip_aware: self.tip_aware,
            fewshot_aware: self.fewshot_aware,
            view_data_batch_size: self.view_data_batch_size.unwrap_or(10),
        })
    }
}

impl Default for MIPROv2Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// MIPROv2 - joint instruction and demonstration optimizer
#[derive(Clone)]
pub struct MIPROv2 {
    metric: MetricFn,
    executor: Arc<dyn ProgramExecutor>,
    proposer: Arc<dyn InstructionProposer>,
    demo_generator: Arc<dyn DemoCandidateGenerator>,
    strategy: Option<Arc<dyn SearchStrategy>>,
    confirmation: Option<Arc<dyn ConfirmationGate>>,
    callbacks: CallbackManager,
    teacher: Option<Program>,
    auto: Option<AutoMode>,
    num_candidates: Option<usize>,
    num_trials: Option<usize>,
    minibatch: bool,
    minibatch_size: usize,
    minibatch_full_eval_steps: usize,
    max_bootstrapped_demos: usize,
    max_labeled_demos: usize,
    num_threads: usize,
    max_errors: usize,
    seed: u64,
    val_ratio: f64,
    requires_permission_to_run: bool,
    failure_policy: FailureScorePolicy,
    program_aware: bool,
    data_aware: bool,
    tip_aware: bool,
    fewshot_aware: bool,
    view_data_batch_size: usize,
}

impl fmt::Debug for MIPROv2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MIPROv2")
            .field("auto", &self.auto)
            .field("num_candidates", &self.num_candidates)
            .field("num_trials", &self.num_trials)
            .field("minibatch", &self.minibatch)
            .field("minibatch_size", &self.minibatch_size)
            .field("minibatch_full_eval_steps", &self.minibatch_full_eval_steps)
            .field("max_bootstrapped_demos", &self.max_bootstrapped_demos)
            .field("max_labeled_demos", &self.max_labeled_demos)
            .field("num_threads", &self.num_threads)
            .field("max_errors", &self.max_errors)
            .field("seed", &self.seed)
            .field("val_ratio", &self.val_ratio)
            .field(
                "requires_permission_to_run",
                &self.requires_permission_to_run,
            )
            .field("metric", &"<function>")
            .field("executor", &"<executor>")
            .finish_non_exhaustive()
    }
}

impl MIPROv2 {
    /// Create a new MIPROv2 builder
    #[must_use]
    pub fn builder() -> MIPROv2Builder {
        MIPROv2Builder::new()
    }

    /// The configured run-mode preset, if any.
    pub fn auto(&self) -> Option<AutoMode> {
        self.auto
    }

    /// The seed shared by all randomized stages.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Whether trials score on minibatches.
    pub fn is_minibatch(&self) -> bool {
        self.minibatch
    }

    /// Optimize `student` against `trainset`, returning the best-found
    /// program and a report of the run.
    ///
    /// When `valset` is `None`, the trainset is split by the configured
    /// ratio; the train side feeds proposal and bootstrapping, the validation
    /// side scores trials. The returned program is always backed by a
    /// full-set evaluation and never scores worse than the student.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] before any evaluation if the program,
    /// datasets, or schedule is invalid. Evaluation failures inside a trial
    /// are recovered; only evaluator errors outside trial scope abort the
    /// run.
    pub async fn compile(
        &self,
        student: &Program,
        trainset: &[Example],
        valset: Option<&[Example]>,
    ) -> Result<(Program, OptimizationReport)> {
        record_optimization_start("mipro_v2");
        let start_time = Instant::now();
        let mut metrics = OptimizerMetrics::start();

        if student.is_empty() {
            return Err(Error::Configuration(
                "Cannot optimize a program with no steps".to_string(),
            ));
        }
        if let Some(teacher) = &self.teacher {
            if teacher.len() != student.len() {
                return Err(Error::Configuration(format!(
                    "Teacher program has {} steps but the student has {}; they must match",
                    teacher.len(),
                    student.len()
                )));
            }
        }

        let (trainset, mut valset) = resolve_datasets(
            trainset.to_vec(),
            valset.map(<[Example]>::to_vec),
            self.val_ratio,
            self.seed,
        )?;
        if let Some(auto) = self.auto {
            let cap = auto.valset_cap();
            if valset.len() > cap {
                let mut rng = StdRng::seed_from_u64(self.seed);
                valset = cap_examples(valset, cap, &mut rng);
                tracing::debug!(cap, "Capped validation set for run mode");
            }
        }

        let zero_shot = self.max_bootstrapped_demos == 0 && self.max_labeled_demos == 0;
        let (num_candidates, search_config) = self.resolve_schedule(student.len(), zero_shot);

        // Reject impossible schedules before any work runs.
        search_config.validate(valset.len())?;

        let estimate = self.estimate_run_cost(&search_config, valset.len());
        tracing::info!(
            num_trials = search_config.num_trials,
            num_candidates,
            zero_shot,
            trainset = trainset.len(),
            valset = valset.len(),
            full_evaluations = estimate.full_evaluations,
            minibatch_evaluations = estimate.minibatch_evaluations,
            total_metric_calls = estimate.total_metric_calls,
            "MIPROv2 run budget"
        );
        if self.requires_permission_to_run {
            if let Some(gate) = &self.confirmation {
                if !gate.confirm(&estimate) {
                    tracing::info!("Run declined; returning student program unchanged");
                    metrics.complete(start_time.elapsed());
                    return Ok((
                        student.clone(),
                        OptimizationReport::declined(metrics, start_time.elapsed()),
                    ));
                }
            }
        }

        let ctx = InvocationContext::root(self.callbacks.clone());

        // Step 1: demo-set candidates. Zero-shot pins the dimension to the
        // single empty set.
        let demo_sets = if zero_shot {
            vec![vec![Vec::new()]; student.len()]
        } else {
            let source = self.teacher.as_ref().unwrap_or(student);
            self.demo_generator
                .generate(source, &trainset, num_candidates, &ctx)
                .await?
        };

        // Step 2: instruction candidates, optionally grounded in the demos.
        let options = self.proposer_options();
        let demo_view = if zero_shot {
            None
        } else {
            Some(demo_sets.as_slice())
        };
        let instructions = self
            .proposer
            .propose(student, &trainset, demo_view, num_candidates, &options)
            .await?;

        let pools = CandidatePools::new(student, instructions, demo_sets)?;
        tracing::info!(space_size = pools.space_size(), "Candidate pools ready");

        // Step 3: budgeted search over the assignment space.
        let evaluator = Evaluator::new(Arc::clone(&self.executor), Arc::clone(&self.metric))
            .with_num_threads(self.num_threads)
            .with_max_errors(self.max_errors)
            .with_failure_policy(self.failure_policy);
        let outcome = match &self.strategy {
            Some(strategy) => {
                strategy
                    .optimize(student, &pools, &evaluator, &valset, &ctx, &mut metrics)
                    .await?
            }
            None => {
                TpeSearchDriver::new(search_config.clone())
                    .optimize(student, &pools, &evaluator, &valset, &ctx, &mut metrics)
                    .await?
            }
        };

        metrics.complete(start_time.elapsed());
        let duration_secs = start_time.elapsed().as_secs_f64();
        record_optimization_complete(
            "mipro_v2",
            search_config.num_trials as u64,
            metrics.total_evaluations() as u64,
            outcome.baseline_score,
            outcome.best_score,
            duration_secs,
        );

        let report = OptimizationReport {
            initial_score: outcome.baseline_score,
            final_score: outcome.best_score,
            iterations: search_config.num_trials,
            converged: outcome.best_score.is_finite(),
            duration_secs,
            best_assignment: Some(outcome.best_assignment),
            score_summary: ScoreSummary::from_trials(&outcome.trials),
            trials: outcome.trials,
            metrics,
        };
        Ok((outcome.best_program, report))
    }

    /// Resolve the candidate count and search schedule, letting explicit
    /// settings override the run-mode preset.
    fn resolve_schedule(&self, num_steps: usize, zero_shot: bool) -> (usize, SearchConfig) {
        let (num_candidates, num_trials) = match self.auto {
            Some(mode) => {
                let n = self.num_candidates.unwrap_or_else(|| mode.num_candidates());
                let num_vars = if zero_shot { num_steps } else { num_steps * 2 };
                let trials = self
                    .num_trials
                    .unwrap_or_else(|| auto_num_trials(n, num_vars));
                (n, trials)
            }
            None => (
                self.num_candidates.unwrap_or(DEFAULT_NUM_CANDIDATES),
                self.num_trials.unwrap_or(DEFAULT_NUM_TRIALS),
            ),
        };
        let config = SearchConfig {
            num_trials,
            minibatch: self.minibatch,
            minibatch_size: self.minibatch_size,
            minibatch_full_eval_steps: self.minibatch_full_eval_steps,
            seed: self.seed,
        };
        (num_candidates, config)
    }

    fn estimate_run_cost(&self, config: &SearchConfig, valset_len: usize) -> RunCostEstimate {
        let (full, minibatched) = if config.minibatch {
            // Baseline, one reconciliation per interval, and the forced
            // final one.
            (
                1 + config.num_trials / config.minibatch_full_eval_steps + 1,
                config.num_trials,
            )
        } else {
            (1 + config.num_trials, 0)
        };
        let batch = config.minibatch_size.min(valset_len);
        RunCostEstimate {
            num_trials: config.num_trials,
            valset_size: valset_len,
            minibatch: config.minibatch,
            minibatch_size: batch,
            full_evaluations: full,
            minibatch_evaluations: minibatched,
            total_metric_calls: full * valset_len + minibatched * batch,
        }
    }

    fn proposer_options(&self) -> ProposerOptions {
        ProposerOptions::new()
            .with_program_aware(self.program_aware)
            .with_data_aware(self.data_aware)
            .with_tip_aware(self.tip_aware)
            .with_fewshot_aware(self.fewshot_aware)
            .with_view_data_batch_size(self.view_data_batch_size)
            .with_seed(self.seed)
    }
}
