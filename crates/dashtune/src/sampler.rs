// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Acquisition sampling over the categorical search space
//!
//! [`TpeSampler`] adapts the tree-structured Parzen estimator to a purely
//! categorical space: each flat dimension (a step's instruction index or
//! demo-set index) gets an independent categorical density.
//!
//! With no history the sampler draws uniformly. Once observations exist, it
//! splits them into a "good" fraction (top scores) and the rest, estimates
//! Laplace-smoothed per-dimension densities for both, draws a batch of
//! candidates from the good density, and keeps the candidate maximizing the
//! good/bad likelihood ratio. A fixed exploration fraction of draws stays
//! uniform so unseen combinations keep non-zero probability. Failed trials
//! carry a score of negative infinity and always land in the bad split.
//!
//! All randomness flows from one seeded generator, so a fixed seed and a
//! fixed record sequence reproduce the exact sample sequence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::stats::weighted_index;

/// Fraction of the history treated as the good split.
const GAMMA: f64 = 0.25;

/// Candidates drawn from the good density per sample.
const NUM_EI_CANDIDATES: usize = 24;

/// Fraction of draws that stay uniform regardless of history.
const EXPLORATION: f64 = 0.1;

/// One recorded observation: a flat assignment and its score.
#[derive(Debug, Clone)]
struct Observation {
    values: Vec<usize>,
    score: f64,
}

/// Categorical tree-structured Parzen estimator sampler.
///
/// Owned exclusively by the search driver; `record` and `sample` alternate
/// sequentially, never concurrently.
#[derive(Debug)]
pub struct TpeSampler {
    dimensions: Vec<usize>,
    observations: Vec<Observation>,
    rng: StdRng,
}

impl TpeSampler {
    /// Create a sampler over the given flat dimension cardinalities.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if there are no dimensions or any
    /// dimension has no candidates.
    pub fn new(dimensions: Vec<usize>, seed: u64) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(Error::Configuration(
                "Sampler requires at least one search dimension".to_string(),
            ));
        }
        if let Some(idx) = dimensions.iter().position(|&k| k == 0) {
            return Err(Error::Configuration(format!(
                "Search dimension {idx} has no candidates"
            )));
        }
        Ok(Self {
            dimensions,
            observations: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Number of recorded observations.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// True if no observations have been recorded.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Record an observed assignment. Failed trials are recorded with
    /// `f64::NEG_INFINITY` and only ever strengthen the bad density.
    pub fn record(&mut self, values: Vec<usize>, score: f64) {
        debug_assert_eq!(values.len(), self.dimensions.len());
        self.observations.push(Observation { values, score });
    }

    /// Propose the next flat assignment.
    pub fn sample(&mut self) -> Vec<usize> {
        if self.observations.is_empty() {
            return self.sample_uniform();
        }
        if self.rng.gen::<f64>() < EXPLORATION {
            return self.sample_uniform();
        }

        let (good, bad) = self.split_observations();
        if good.is_empty() || bad.is_empty() {
            return self.sample_uniform();
        }

        let good_weights = Self::smoothed_counts(&good, &self.dimensions);
        let bad_weights = Self::smoothed_counts(&bad, &self.dimensions);

        // Draw candidates from the good density and keep the best ratio.
        // Strictly-greater comparison makes the earliest drawn candidate win
        // ties, which keeps runs reproducible.
        let mut best: Option<(Vec<usize>, f64)> = None;
        for _ in 0..NUM_EI_CANDIDATES {
            let candidate: Vec<usize> = good_weights
                .iter()
                .map(|weights| weighted_index(weights, &mut self.rng).unwrap_or(0))
                .collect();

            // Normalizing constants are identical across candidates within a
            // dimension and cancel in the argmax.
            let ratio: f64 = candidate
                .iter()
                .enumerate()
                .map(|(d, &v)| good_weights[d][v].ln() - bad_weights[d][v].ln())
                .sum();

            let better = match &best {
                Some((_, best_ratio)) => ratio > *best_ratio,
                None => true,
            };
            if better {
                best = Some((candidate, ratio));
            }
        }

        match best {
            Some((candidate, _)) => candidate,
            None => self.sample_uniform(),
        }
    }

    fn sample_uniform(&mut self) -> Vec<usize> {
        let rng = &mut self.rng;
        self.dimensions.iter().map(|&k| rng.gen_range(0..k)).collect()
    }

    /// Split observations into the top-scoring fraction and the rest.
    /// Infinite (failed) scores never enter the good split.
    fn split_observations(&self) -> (Vec<&Observation>, Vec<&Observation>) {
        let mut finite: Vec<&Observation> = self
            .observations
            .iter()
            .filter(|o| o.score.is_finite())
            .collect();
        let failed: Vec<&Observation> = self
            .observations
            .iter()
            .filter(|o| !o.score.is_finite())
            .collect();

        // Stable sort keeps earlier trials first among equal scores.
        finite.sort_by(|a, b| b.score.total_cmp(&a.score));

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n_good = ((GAMMA * self.observations.len() as f64).ceil() as usize).min(finite.len());

        let good = finite[..n_good].to_vec();
        let mut bad = finite[n_good..].to_vec();
        bad.extend(failed);
        (good, bad)
    }

    /// Laplace-smoothed per-dimension value counts for one split.
    fn smoothed_counts(observations: &[&Observation], dimensions: &[usize]) -> Vec<Vec<f64>> {
        let mut weights: Vec<Vec<f64>> = dimensions.iter().map(|&k| vec![1.0; k]).collect();
        for obs in observations {
            for (d, &v) in obs.values.iter().enumerate() {
                if let Some(w) = weights[d].get_mut(v) {
                    *w += 1.0;
                }
            }
        }
        weights
    }
}
