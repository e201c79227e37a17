// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Instruction candidate proposal
//!
//! [`InstructionProposer`] is the boundary the search consumes: per program
//! step, an ordered list of candidate instruction strings. The search only
//! requires stable indexing (index `i` names the same string for the whole
//! run) and determinism under a fixed seed; how the text is produced is the
//! proposer's business.
//!
//! [`GroundedProposer`] is the built-in implementation. It generates
//! candidates without any model calls: the step's original instruction always
//! holds index 0, prompting tips produce variations in a seeded order, and
//! remaining slots are filled with numbered variants. Dataset and program
//! context are summarized for diagnostics when the corresponding awareness
//! flags are set.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Error, Result};
use crate::example::Example;
use crate::program::{DemoSet, Program, Step};

/// Tips for instruction generation (applied in seeded order to encourage
/// diversity).
const TIPS: &[(&str, &str)] = &[
    ("none", ""),
    ("creative", "Don't be afraid to be creative when creating the new instruction!"),
    ("simple", "Keep the instruction clear and concise."),
    ("description", "Make sure your instruction is very informative and descriptive."),
    ("high_stakes", "The instruction should include a high stakes scenario in which the LM must solve the task!"),
    ("persona", "Include a persona that is relevant to the task in the instruction (ie. \"You are a ...\")"),
];

/// Context the proposer is allowed to ground candidates in.
#[derive(Debug, Clone)]
pub struct ProposerOptions {
    /// Summarize the program structure for proposal context.
    pub program_aware: bool,
    /// Summarize the training data for proposal context.
    pub data_aware: bool,
    /// Use prompting tips to diversify candidates.
    pub tip_aware: bool,
    /// Make demo candidates available for proposal context.
    pub fewshot_aware: bool,
    /// Examples inspected when building the dataset summary.
    pub view_data_batch_size: usize,
    /// Seed for candidate ordering.
    pub seed: u64,
}

impl Default for ProposerOptions {
    fn default() -> Self {
        Self {
            program_aware: true,
            data_aware: true,
            tip_aware: true,
            fewshot_aware: true,
            view_data_batch_size: 10,
            seed: 9,
        }
    }
}

impl ProposerOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set program-aware mode.
    #[must_use]
    pub fn with_program_aware(mut self, program_aware: bool) -> Self {
        self.program_aware = program_aware;
        self
    }

    /// Builder: set data-aware mode.
    #[must_use]
    pub fn with_data_aware(mut self, data_aware: bool) -> Self {
        self.data_aware = data_aware;
        self
    }

    /// Builder: set tip-aware mode.
    #[must_use]
    pub fn with_tip_aware(mut self, tip_aware: bool) -> Self {
        self.tip_aware = tip_aware;
        self
    }

    /// Builder: set fewshot-aware mode.
    #[must_use]
    pub fn with_fewshot_aware(mut self, fewshot_aware: bool) -> Self {
        self.fewshot_aware = fewshot_aware;
        self
    }

    /// Builder: set the batch size for dataset summary generation.
    #[must_use]
    pub fn with_view_data_batch_size(mut self, size: usize) -> Self {
        self.view_data_batch_size = size;
        self
    }

    /// Builder: set the seed for candidate ordering.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Proposes instruction candidates for every step of a program.
///
/// Implementations must return one non-empty ordered list per step, keep
/// indexing stable within a run, and be deterministic under a fixed
/// `options.seed` so trials are reproducible.
#[async_trait]
pub trait InstructionProposer: Send + Sync {
    /// Propose `num_candidates` instruction strings per step.
    ///
    /// `demo_candidates`, when present, is index-aligned with the program's
    /// steps and carries the demo sets a fewshot-aware proposer may ground
    /// its candidates in.
    async fn propose(
        &self,
        program: &Program,
        trainset: &[Example],
        demo_candidates: Option<&[Vec<DemoSet>]>,
        num_candidates: usize,
        options: &ProposerOptions,
    ) -> Result<Vec<Vec<String>>>;
}

/// Built-in proposer that grounds candidates in the task without model calls.
///
/// Index 0 of every step's list is the step's original instruction, so the
/// baseline assignment always reproduces the student program. Variations are
/// tip-based; the tip order is drawn per step from `options.seed`, and slots
/// beyond the tip pool are filled with numbered variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroundedProposer;

impl GroundedProposer {
    /// Create a new proposer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn propose_for_step(
        step: &Step,
        step_index: usize,
        num_candidates: usize,
        options: &ProposerOptions,
    ) -> Vec<String> {
        let current = if step.instruction().is_empty() {
            "Solve the task".to_string()
        } else {
            step.instruction().to_string()
        };

        let mut candidates = vec![current.clone()];

        if options.tip_aware {
            let mut order: Vec<usize> = (1..TIPS.len()).collect();
            let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(step_index as u64));
            order.shuffle(&mut rng);
            for tip_index in order {
                if candidates.len() >= num_candidates {
                    break;
                }
                candidates.push(format!("{} (Tip: {})", current, TIPS[tip_index].1));
            }
        }

        // Fill any remaining slots with numbered variants.
        for i in candidates.len()..num_candidates {
            candidates.push(format!("{} (Variant {})", current, i));
        }

        candidates.truncate(num_candidates);
        candidates
    }
}

#[async_trait]
impl InstructionProposer for GroundedProposer {
    async fn propose(
        &self,
        program: &Program,
        trainset: &[Example],
        demo_candidates: Option<&[Vec<DemoSet>]>,
        num_candidates: usize,
        options: &ProposerOptions,
    ) -> Result<Vec<Vec<String>>> {
        if num_candidates == 0 {
            return Err(Error::Proposal(
                "At least one instruction candidate per step is required".to_string(),
            ));
        }

        if options.data_aware && !trainset.is_empty() {
            let summary = create_dataset_summary(trainset, options.view_data_batch_size);
            tracing::debug!(summary = %summary, "Dataset summary");
        }
        if options.program_aware {
            let structure = describe_program(program);
            tracing::debug!(structure = %structure, "Program structure");
        }
        if options.fewshot_aware {
            if let Some(demos) = demo_candidates {
                let sets: usize = demos.iter().map(Vec::len).sum();
                tracing::debug!(demo_sets = sets, "Demo candidates available for grounding");
            }
        }

        let per_step = program
            .steps()
            .iter()
            .enumerate()
            .map(|(idx, step)| Self::propose_for_step(step, idx, num_candidates, options))
            .collect();

        Ok(per_step)
    }
}

/// Summarize a program's structure for proposal context.
pub fn describe_program(program: &Program) -> String {
    let mut out = format!("Program with {} steps.\n", program.len());
    for step in program.steps() {
        out.push_str(&format!(
            "  {}: {} -> {}\n",
            step.name,
            step.signature.input_names().join(", "),
            step.signature.output_names().join(", "),
        ));
    }
    out
}

/// Create a summary of the dataset for proposal context.
///
/// Shows field names and up to `batch_size` example inputs, with long values
/// truncated.
pub fn create_dataset_summary(trainset: &[Example], batch_size: usize) -> String {
    if trainset.is_empty() {
        return "Empty dataset".to_string();
    }

    let sample_size = std::cmp::min(trainset.len(), batch_size);
    let samples = &trainset[..sample_size];

    let first = &samples[0];
    let inputs: Vec<String> = first.inputs().keys().cloned().collect();
    let labels: Vec<String> = first.labels().keys().cloned().collect();

    let mut summary = format!("Dataset with {} examples.\n", trainset.len());
    summary.push_str(&format!("Input fields: {}\n", inputs.join(", ")));
    summary.push_str(&format!("Output fields: {}\n", labels.join(", ")));

    summary.push_str(&format!(
        "\nExample inputs (showing {} examples):\n",
        sample_size
    ));
    for (i, example) in samples.iter().enumerate() {
        summary.push_str(&format!("  Example {}:\n", i + 1));
        for (key, value) in example.inputs().iter() {
            let val_str = match value {
                serde_json::Value::String(s) => {
                    if s.chars().count() > 100 {
                        format!("{}...", s.chars().take(100).collect::<String>())
                    } else {
                        s.clone()
                    }
                }
                other => format!("{}", other),
            };
            summary.push_str(&format!("    {}: {}\n", key, val_str));
        }
    }

    summary
}
