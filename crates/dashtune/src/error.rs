// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Error types for DashTune
//!
//! All optimizer entry points return [`Result`]. Errors split into two
//! severities: configuration errors abort a run before any trial executes,
//! while evaluation errors are scoped to the trial that raised them and the
//! search continues around them.

use thiserror::Error;

/// DashTune error types
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid optimizer or run configuration (bad assignment indices,
    /// minibatch size exceeding the validation set, empty datasets).
    /// Always raised before any trial executes.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Too many per-example failures inside a single trial's evaluation.
    /// Fails that trial only; the run continues.
    #[error("Evaluation budget exceeded: {failures} of {evaluated} examples failed (max_errors = {max_errors})")]
    EvaluationBudget {
        /// Number of examples whose execution or scoring failed.
        failures: usize,
        /// Number of examples attempted before the budget tripped.
        evaluated: usize,
        /// The configured failure budget.
        max_errors: usize,
    },

    /// A program step failed while being executed against one example.
    #[error("Step execution error in '{step}': {source}")]
    StepExecution {
        /// Name of the step that failed.
        step: String,
        /// The underlying error that occurred.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The instruction proposer returned no usable candidates for a step.
    #[error("Instruction proposal error: {0}")]
    Proposal(String),

    /// Demo candidate generation failed
    #[error("Demo generation error: {0}")]
    DemoGeneration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Returns true if this error fails a single trial but leaves the
    /// surrounding search loop able to continue.
    pub fn is_trial_scoped(&self) -> bool {
        matches!(
            self,
            Error::EvaluationBudget { .. } | Error::StepExecution { .. }
        )
    }

    /// Returns true if this error must abort the entire run.
    pub fn is_fatal(&self) -> bool {
        !self.is_trial_scoped()
    }
}

/// Result type for DashTune operations
pub type Result<T> = std::result::Result<T, Error>;
