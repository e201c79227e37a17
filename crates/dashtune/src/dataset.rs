// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Dataset partitioning and minibatch draws
//!
//! The optimizer needs two disjoint partitions: a train split feeding the
//! proposer and demo generator, and a validation split that scores trials.
//! When the caller only supplies a trainset, [`resolve_datasets`] carves the
//! validation split out of it with a seeded shuffle. Most of the data goes
//! to validation: trial scoring dominates the call budget and benefits from
//! lower variance.

use crate::error::{Error, Result};
use crate::example::Example;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Fraction of the trainset moved to validation when no valset is supplied.
pub const DEFAULT_VAL_RATIO: f64 = 0.8;

/// Validate the caller's partitions, splitting `trainset` when `valset` is
/// absent. Returns `(trainset, valset)`, both non-empty and disjoint.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if `trainset` is empty, a supplied
/// `valset` is empty, or `trainset` is too small to split.
pub fn resolve_datasets(
    trainset: Vec<Example>,
    valset: Option<Vec<Example>>,
    val_ratio: f64,
    seed: u64,
) -> Result<(Vec<Example>, Vec<Example>)> {
    if trainset.is_empty() {
        return Err(Error::Configuration("Trainset cannot be empty".to_string()));
    }

    match valset {
        Some(valset) => {
            if valset.is_empty() {
                return Err(Error::Configuration(
                    "Validation set must have at least 1 example".to_string(),
                ));
            }
            Ok((trainset, valset))
        }
        None => split_trainset(trainset, val_ratio, seed),
    }
}

/// Split `trainset` into `(train, val)` with a seeded shuffle. The val side
/// receives `val_ratio` of the examples, clamped so both sides stay
/// non-empty.
pub fn split_trainset(
    trainset: Vec<Example>,
    val_ratio: f64,
    seed: u64,
) -> Result<(Vec<Example>, Vec<Example>)> {
    if !(0.0 < val_ratio && val_ratio < 1.0) {
        return Err(Error::Configuration(format!(
            "Validation ratio must be in (0, 1), got {val_ratio}"
        )));
    }
    let n = trainset.len();
    if n < 2 {
        return Err(Error::Configuration(
            "Trainset must have at least 2 examples when no valset is provided".to_string(),
        ));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let val_n = ((n as f64) * val_ratio).round().clamp(1.0, (n - 1) as f64) as usize;

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (val_indices, train_indices) = indices.split_at(val_n);
    let val = val_indices.iter().map(|&i| trainset[i].clone()).collect();
    let train = train_indices.iter().map(|&i| trainset[i].clone()).collect();
    Ok((train, val))
}

/// Draw a fresh minibatch of `size` examples from `valset` without
/// replacement. Sizes larger than the valset are clamped; the driver rejects
/// that configuration before any trial runs.
pub fn draw_minibatch(valset: &[Example], size: usize, rng: &mut StdRng) -> Vec<Example> {
    let size = size.min(valset.len());
    let mut indices: Vec<usize> = (0..valset.len()).collect();
    indices.shuffle(rng);
    indices
        .iter()
        .take(size)
        .map(|&i| valset[i].clone())
        .collect()
}

/// Cap `examples` at `cap` entries by seeded subsampling, preserving the
/// original relative order. Used when a run-mode preset limits the
/// validation-set size.
pub fn cap_examples(examples: Vec<Example>, cap: usize, rng: &mut StdRng) -> Vec<Example> {
    if examples.len() <= cap {
        return examples;
    }
    let mut indices: Vec<usize> = (0..examples.len()).collect();
    indices.shuffle(rng);
    let mut keep: Vec<usize> = indices.into_iter().take(cap).collect();
    keep.sort_unstable();
    keep.into_iter().map(|i| examples[i].clone()).collect()
}
