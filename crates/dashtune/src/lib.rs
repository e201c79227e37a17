// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)
// DashTune - Prompt and Few-Shot Optimization for LM Programs

// Unit tests assert on known float constants (scores, ratios, thresholds).
#![cfg_attr(test, allow(clippy::float_cmp))]

//! # DashTune
//!
//! Budgeted prompt optimization for multi-step LM programs.
//!
//! DashTune tunes the prompts of a program rather than model weights: for
//! every step it searches over candidate instruction texts and candidate
//! few-shot demonstration sets, scoring whole-program configurations with a
//! user-supplied metric under a fixed trial budget.
//!
//! ## Features
//!
//! - **MIPROv2**: joint instruction + few-shot optimization driven by a
//!   Tree-structured Parzen Estimator over the categorical search space
//!   ([arxiv:2406.11695](https://arxiv.org/abs/2406.11695))
//! - **Demo Bootstrapping**: candidate demonstration sets harvested from
//!   metric-validated program traces
//! - **Grounded Proposal**: instruction candidates grounded in the program
//!   shape, dataset samples, and prompting tips
//! - **Minibatch Search**: cheap minibatch scoring with periodic full-set
//!   reconciliation; the winner is always decided on full-set scores
//! - **Budget Control**: run modes (light/medium/heavy), an up-front cost
//!   estimate, and an optional confirmation gate before any evaluation spend
//! - **Deterministic**: every randomized stage derives from a single seed, so
//!   identical inputs reproduce identical runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use dashtune::{make_signature, AutoMode, Example, MIPROv2, Program, Step};
//!
//! // A one-step question-answering program.
//! let signature = make_signature("question -> answer", "Answer the question.")?;
//! let student = Program::new().with_step(Step::new("qa", signature));
//!
//! // Exact-match metric over the answer field.
//! let metric = Arc::new(|expected: &Example, predicted: &Example| {
//!     Ok(dashtune::field_exact_match(expected, predicted, "answer"))
//! });
//!
//! let optimizer = MIPROv2::builder()
//!     .metric(metric)
//!     .executor(executor)
//!     .auto(AutoMode::Light)
//!     .requires_permission_to_run(false)
//!     .build()?;
//!
//! let (optimized, report) = optimizer.compile(&student, &trainset, None).await?;
//! println!("score: {:.4} -> {:.4}", report.initial_score, report.final_score);
//! ```

/// Invocation callbacks and correlation contexts for observability.
pub mod callbacks;
/// Train/validation split resolution and seeded subsampling.
pub mod dataset;
/// Candidate demonstration-set generation by bootstrapping traces.
pub mod demos;
/// Error and result types shared across the crate.
pub mod error;
/// Parallel program evaluation against example sets.
pub mod evaluate;
/// Key/value examples with input-field designation.
pub mod example;
/// Metric function type and builtin text metrics.
pub mod metrics;
/// The MIPROv2 optimizer: builder, run modes, and the compile entry point.
pub mod mipro_v2;
/// Programs, steps, assignments, and candidate pools.
pub mod program;
/// Instruction proposal grounded in program, data, and tips.
pub mod propose;
/// Tree-structured Parzen Estimator over categorical dimensions.
pub mod sampler;
/// Trial loop, minibatch scheduling, and pluggable search strategies.
pub mod search;
/// Step signatures and field declarations.
pub mod signature;
/// Statistics helpers used by scoring and the sampler.
pub mod stats;
/// Structured telemetry events and per-run metrics.
pub mod telemetry;

// Re-export the optimizer surface for convenience
pub use mipro_v2::{
    AutoMode, ConfirmationGate, MIPROv2, MIPROv2Builder, OptimizationReport, RunCostEstimate,
};

// Re-export optimizer configuration defaults
pub use mipro_v2::{
    DEFAULT_MINIBATCH_FULL_EVAL_STEPS, DEFAULT_MINIBATCH_SIZE, DEFAULT_NUM_CANDIDATES,
    DEFAULT_NUM_TRIALS, DEFAULT_SEED,
};

// Core data model
pub use error::{Error, Result};
pub use example::Example;
pub use program::{Assignment, CandidatePools, DemoSet, Program, Step, StepChoice};
pub use signature::{make_signature, Field, Signature};

// Evaluation and metrics
pub use evaluate::{EvaluationOutcome, Evaluator, FailureScorePolicy, ProgramExecutor};
pub use metrics::{exact_match, field_exact_match, normalize_text, MetricFn};

// Candidate generation seams
pub use demos::{BootstrapDemoGenerator, DemoCandidateGenerator};
pub use propose::{GroundedProposer, InstructionProposer, ProposerOptions};

// Search machinery
pub use sampler::TpeSampler;
pub use search::{
    EvalKind, ScoreSummary, SearchConfig, SearchOutcome, SearchStrategy, TpeSearchDriver, Trial,
};

// Observability
pub use callbacks::{
    CallbackHandler, CallbackManager, ConsoleCallbackHandler, InvocationContext, InvocationKind,
    NullCallbackHandler, RecordedEvent, RecordingCallbackHandler,
};
pub use telemetry::OptimizerMetrics;
