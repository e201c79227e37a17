// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Programs, steps, and candidate configuration
//!
//! A [`Program`] is an ordered collection of prompted [`Step`]s. The
//! optimizer never executes a program itself; it rebinds each step's
//! instruction text and demo set, producing independent configured copies via
//! [`CandidatePools::configure`]. Configuration is pure: the base program is
//! never touched, and two configured programs share no mutable state.

use crate::error::{Error, Result};
use crate::example::Example;
use crate::signature::Signature;
use serde::{Deserialize, Serialize};

/// An ordered sequence of demonstration examples bound to a step.
pub type DemoSet = Vec<Example>;

/// One prompted unit within a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step name, unique within its program.
    pub name: String,
    /// Field contract and bound instruction text.
    pub signature: Signature,
    /// Bound few-shot demonstrations (may be empty).
    pub demos: DemoSet,
}

impl Step {
    /// Create a step with no demos bound.
    #[must_use]
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        Self {
            name: name.into(),
            signature,
            demos: Vec::new(),
        }
    }

    /// The currently bound instruction text.
    pub fn instruction(&self) -> &str {
        &self.signature.instructions
    }
}

/// An ordered collection of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    steps: Vec<Step>,
}

impl Program {
    /// Create an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// The steps, in execution order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Mutable access to the steps. Used by configuration; callers binding
    /// state by hand are responsible for keeping names unique.
    pub fn steps_mut(&mut self) -> &mut [Step] {
        &mut self.steps
    }

    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if the program has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// The `(instruction_index, demoset_index)` choice for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepChoice {
    /// Index into the step's instruction candidate list.
    pub instruction: usize,
    /// Index into the step's demo-set candidate list.
    pub demos: usize,
}

/// A full choice of instruction and demo-set index for every step: one
/// point in the search space. Choices are index-aligned with program steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    /// Per-step choices, in step order.
    pub choices: Vec<StepChoice>,
}

impl Assignment {
    /// The baseline assignment for `num_steps` steps: index 0 everywhere,
    /// which reproduces the student program as given.
    #[must_use]
    pub fn baseline(num_steps: usize) -> Self {
        Self {
            choices: vec![
                StepChoice {
                    instruction: 0,
                    demos: 0,
                };
                num_steps
            ],
        }
    }

    /// Flatten to one categorical value per search dimension:
    /// `[step0_instruction, step0_demos, step1_instruction, ...]`.
    pub fn to_flat(&self) -> Vec<usize> {
        let mut flat = Vec::with_capacity(self.choices.len() * 2);
        for choice in &self.choices {
            flat.push(choice.instruction);
            flat.push(choice.demos);
        }
        flat
    }

    /// Rebuild from the flat dimension layout produced by [`Self::to_flat`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the value count is odd.
    pub fn from_flat(values: &[usize]) -> Result<Self> {
        if values.len() % 2 != 0 {
            return Err(Error::Configuration(format!(
                "Flat assignment must have an even number of values, got {}",
                values.len()
            )));
        }
        Ok(Self {
            choices: values
                .chunks_exact(2)
                .map(|pair| StepChoice {
                    instruction: pair[0],
                    demos: pair[1],
                })
                .collect(),
        })
    }
}

/// Per-step candidate pools the search chooses from.
///
/// Outer vectors are index-aligned with the program's steps. Candidate lists
/// are immutable once built; index `i` refers to the same candidate for the
/// whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePools {
    /// Instruction candidates per step. Index 0 is the step's original
    /// instruction.
    pub instructions: Vec<Vec<String>>,
    /// Demo-set candidates per step. Index 0 is the empty set.
    pub demo_sets: Vec<Vec<DemoSet>>,
}

impl CandidatePools {
    /// Build pools and check them against `program`: pool counts must match
    /// the step count and every step needs at least one candidate of each
    /// kind.
    pub fn new(
        program: &Program,
        instructions: Vec<Vec<String>>,
        demo_sets: Vec<Vec<DemoSet>>,
    ) -> Result<Self> {
        if instructions.len() != program.len() || demo_sets.len() != program.len() {
            return Err(Error::Configuration(format!(
                "Candidate pools cover {} instruction lists and {} demo lists for a {}-step program",
                instructions.len(),
                demo_sets.len(),
                program.len()
            )));
        }
        for (idx, step) in program.steps().iter().enumerate() {
            if instructions[idx].is_empty() {
                return Err(Error::Configuration(format!(
                    "Step '{}' has no instruction candidates",
                    step.name
                )));
            }
            if demo_sets[idx].is_empty() {
                return Err(Error::Configuration(format!(
                    "Step '{}' has no demo-set candidates",
                    step.name
                )));
            }
        }
        Ok(Self {
            instructions,
            demo_sets,
        })
    }

    /// Collapse the demo dimension to a single empty set per step
    /// (zero-shot mode).
    pub fn collapse_demos(&mut self) {
        for sets in &mut self.demo_sets {
            *sets = vec![Vec::new()];
        }
    }

    /// Cardinality of each flat search dimension:
    /// `[step0_instructions, step0_demo_sets, step1_instructions, ...]`.
    pub fn dimensions(&self) -> Vec<usize> {
        let mut dims = Vec::with_capacity(self.instructions.len() * 2);
        for (instr, demos) in self.instructions.iter().zip(&self.demo_sets) {
            dims.push(instr.len());
            dims.push(demos.len());
        }
        dims
    }

    /// Total number of points in the search space.
    pub fn space_size(&self) -> usize {
        self.dimensions().iter().product()
    }

    /// Bind `assignment`'s selected candidates onto a deep copy of `base`.
    ///
    /// Pure: `base` is never mutated, and repeated calls with the same
    /// assignment produce equal programs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the assignment's step count does
    /// not match the program, or any candidate index is out of range.
    pub fn configure(&self, base: &Program, assignment: &Assignment) -> Result<Program> {
        if assignment.choices.len() != base.len() {
            return Err(Error::Configuration(format!(
                "Assignment covers {} steps but the program has {}",
                assignment.choices.len(),
                base.len()
            )));
        }

        let mut configured = base.clone();
        for (idx, step) in configured.steps_mut().iter_mut().enumerate() {
            let choice = &assignment.choices[idx];
            let instruction = self.instructions[idx].get(choice.instruction).ok_or_else(|| {
                Error::Configuration(format!(
                    "Step '{}' has {} instruction candidates; index {} is out of range",
                    step.name,
                    self.instructions[idx].len(),
                    choice.instruction
                ))
            })?;
            let demos = self.demo_sets[idx].get(choice.demos).ok_or_else(|| {
                Error::Configuration(format!(
                    "Step '{}' has {} demo-set candidates; index {} is out of range",
                    step.name,
                    self.demo_sets[idx].len(),
                    choice.demos
                ))
            })?;
            step.signature.instructions = instruction.clone();
            step.demos = demos.clone();
        }
        Ok(configured)
    }
}
