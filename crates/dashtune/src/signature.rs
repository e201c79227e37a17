// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Step signatures
//!
//! A [`Signature`] names the input and output fields of one prompted step
//! plus the step's instruction text. The optimizer only rebinds the
//! instruction (and demos) on a signature; the field structure is opaque to
//! the search and is consumed by proposers when summarizing the task.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One named field within a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name, e.g. `"question"`.
    pub name: String,
    /// Human-readable description of the field.
    pub description: String,
    /// Display prefix override; defaults to the title-cased name.
    pub prefix: Option<String>,
}

impl Field {
    /// Create an input field.
    pub fn input(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prefix: None,
        }
    }

    /// Create an output field.
    pub fn output(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prefix: None,
        }
    }

    /// Display prefix for this field: the explicit prefix if set, otherwise
    /// the title-cased field name (`"question"` -> `"Question"`).
    pub fn get_prefix(&self) -> String {
        match &self.prefix {
            Some(p) => p.clone(),
            None => title_case(&self.name),
        }
    }
}

fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_word_start = true;
    for ch in name.chars() {
        if ch == '_' {
            out.push(' ');
            at_word_start = true;
        } else if at_word_start {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Input/output contract for one prompted step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Signature name, e.g. `"SimpleQA"`.
    pub name: String,
    /// Instruction text bound to this step.
    pub instructions: String,
    /// Input fields, in prompt order.
    pub input_fields: Vec<Field>,
    /// Output fields, in prompt order.
    pub output_fields: Vec<Field>,
}

impl Signature {
    /// Create an empty signature with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: String::new(),
            input_fields: Vec::new(),
            output_fields: Vec::new(),
        }
    }

    /// Set the instruction text.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Append an input field.
    #[must_use]
    pub fn with_input(mut self, field: Field) -> Self {
        self.input_fields.push(field);
        self
    }

    /// Append an output field.
    #[must_use]
    pub fn with_output(mut self, field: Field) -> Self {
        self.output_fields.push(field);
        self
    }

    /// Names of the input fields, in order.
    pub fn input_names(&self) -> Vec<&str> {
        self.input_fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Names of the output fields, in order.
    pub fn output_names(&self) -> Vec<&str> {
        self.output_fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Build a signature from a compact `"inputs -> outputs"` spec, e.g.
/// `"question -> answer"` or `"context, question -> answer"`.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the spec has no `->` separator or
/// either side is empty.
pub fn make_signature(spec: &str, instructions: &str) -> Result<Signature> {
    let (inputs, outputs) = spec.split_once("->").ok_or_else(|| {
        Error::Configuration(format!(
            "Signature spec '{spec}' must contain '->' separating inputs from outputs"
        ))
    })?;

    let parse_side = |side: &str| -> Vec<String> {
        side.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    };

    let input_names = parse_side(inputs);
    let output_names = parse_side(outputs);
    if input_names.is_empty() || output_names.is_empty() {
        return Err(Error::Configuration(format!(
            "Signature spec '{spec}' must name at least one input and one output field"
        )));
    }

    let mut signature = Signature::new(spec).with_instructions(instructions);
    for name in input_names {
        signature = signature.with_input(Field::input(name, ""));
    }
    for name in output_names {
        signature = signature.with_output(Field::output(name, ""));
    }
    Ok(signature)
}
