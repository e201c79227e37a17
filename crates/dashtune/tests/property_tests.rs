//! # Property-Based Tests for DashTune Core Types
//!
//! These tests use proptest to generate arbitrary inputs and verify that
//! structural invariants hold regardless of the specific values: assignments
//! survive the flat encoding, samplers stay inside their dimensions, dataset
//! splits lose nothing, and score statistics stay ordered.
//!
//! ## Test Categories
//!
//! 1. **Assignment encoding**: flat round-trips and shape checks
//! 2. **Acquisition sampling**: dimension bounds and seed determinism
//! 3. **Dataset handling**: split partitions, minibatch draws, capping
//! 4. **Score statistics**: bounds and ordering of summary values
//! 5. **Text normalization**: idempotence and canonical form
//! 6. **Candidate binding**: purity and agreement with the flat space

#![allow(clippy::redundant_closure)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use dashtune::dataset::{cap_examples, draw_minibatch, split_trainset};
use dashtune::stats::{average_score, percentile, std_dev, weighted_index};
use dashtune::{
    make_signature, normalize_text, Assignment, CandidatePools, EvalKind, Example, Program,
    ScoreSummary, Step, StepChoice, TpeSampler, Trial,
};

// ============================================================================
// Strategies and Fixtures
// ============================================================================

/// Flat dimension cardinalities for a sampler (every dimension non-empty).
fn arb_dimensions() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..=8, 1..=6)
}

/// Per-step `(instruction, demos)` index pairs.
fn arb_step_choices() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0usize..16, 0usize..16), 1..=8)
}

/// Score lists in the conventional `[0.0, 1.0]` metric range.
fn arb_scores() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0f64..=1.0, 1..=30)
}

/// ASCII text with mixed case and irregular whitespace.
fn arb_messy_text() -> impl Strategy<Value = String> {
    "[ \tA-Za-z0-9]{0,40}"
}

fn assignment_from_pairs(pairs: &[(usize, usize)]) -> Assignment {
    Assignment {
        choices: pairs
            .iter()
            .map(|&(instruction, demos)| StepChoice { instruction, demos })
            .collect(),
    }
}

/// Examples tagged with their original position so identity survives
/// shuffling.
fn numbered_examples(n: usize) -> Vec<Example> {
    (0..n)
        .map(|i| {
            Example::new()
                .with_field("idx", i.to_string())
                .with_inputs(&["idx"])
        })
        .collect()
}

fn positions(examples: &[Example]) -> Vec<usize> {
    examples
        .iter()
        .map(|e| e.get_str("idx").unwrap().parse().unwrap())
        .collect()
}

/// Run a sampler for `rounds` alternating sample/record calls, scoring each
/// draw with a deterministic function of its values.
fn replay_sampler(dimensions: &[usize], seed: u64, rounds: usize) -> Vec<Vec<usize>> {
    let mut sampler = TpeSampler::new(dimensions.to_vec(), seed).unwrap();
    let mut sampled = Vec::with_capacity(rounds);
    for _ in 0..rounds {
        let values = sampler.sample();
        let score = (values.iter().sum::<usize>() % 5) as f64 / 5.0;
        sampler.record(values.clone(), score);
        sampled.push(values);
    }
    sampled
}

/// A program with `n` named steps over a shared question/answer signature.
fn program_with_steps(n: usize) -> Program {
    let mut program = Program::new();
    for i in 0..n {
        let signature = make_signature("question -> answer", "Answer the question.").unwrap();
        program = program.with_step(Step::new(format!("step{i}"), signature));
    }
    program
}

fn trials_from_scores(scores: &[f64]) -> Vec<Trial> {
    scores
        .iter()
        .enumerate()
        .map(|(index, &score)| Trial {
            index,
            assignment: Assignment::baseline(1),
            score,
            eval: EvalKind::Full,
            failed: false,
        })
        .collect()
}

// ============================================================================
// Assignment Encoding Properties
// ============================================================================

proptest! {
    /// Property: flattening an assignment and rebuilding it yields the
    /// original assignment.
    ///
    /// Invariant: `from_flat` is a left inverse of `to_flat`.
    #[test]
    fn prop_assignment_flat_round_trip(choices in arb_step_choices()) {
        let assignment = assignment_from_pairs(&choices);

        let flat = assignment.to_flat();
        prop_assert_eq!(flat.len(), choices.len() * 2);

        let rebuilt = Assignment::from_flat(&flat).unwrap();
        prop_assert_eq!(rebuilt, assignment);
    }

    /// Property: flat encodings with an odd number of values are rejected.
    ///
    /// Invariant: every step contributes exactly two flat dimensions.
    #[test]
    fn prop_odd_flat_encodings_rejected(choices in arb_step_choices()) {
        let mut flat = assignment_from_pairs(&choices).to_flat();
        flat.push(0);

        let err = Assignment::from_flat(&flat).unwrap_err();
        prop_assert!(err.to_string().contains("even number"));
    }

    /// Property: the baseline assignment flattens to all zeros, one pair of
    /// dimensions per step.
    #[test]
    fn prop_baseline_is_all_zeros(num_steps in 1usize..12) {
        let flat = Assignment::baseline(num_steps).to_flat();
        prop_assert_eq!(flat.len(), num_steps * 2);
        prop_assert!(flat.iter().all(|&v| v == 0));
    }
}

// ============================================================================
// Acquisition Sampling Properties
// ============================================================================

proptest! {
    /// Property: every sampled value stays below its dimension cardinality,
    /// whether the sampler is cold or warmed with history.
    ///
    /// Invariant: samples always index valid candidates in every dimension.
    #[test]
    fn prop_samples_stay_in_bounds(
        dimensions in arb_dimensions(),
        seed in any::<u64>(),
        rounds in 1usize..40,
    ) {
        for values in replay_sampler(&dimensions, seed, rounds) {
            prop_assert_eq!(values.len(), dimensions.len());
            for (value, &cardinality) in values.iter().zip(&dimensions) {
                prop_assert!(*value < cardinality);
            }
        }
    }

    /// Property: the same seed and record sequence reproduce the same sample
    /// sequence.
    ///
    /// Invariant: optimizer runs are reproducible under a fixed seed.
    #[test]
    fn prop_sampler_is_deterministic(
        dimensions in arb_dimensions(),
        seed in any::<u64>(),
        rounds in 1usize..30,
    ) {
        prop_assert_eq!(
            replay_sampler(&dimensions, seed, rounds),
            replay_sampler(&dimensions, seed, rounds)
        );
    }
}

// ============================================================================
// Dataset Handling Properties
// ============================================================================

proptest! {
    /// Property: splitting a trainset partitions it exactly: sizes sum to
    /// the original, both sides are non-empty, and every example lands on
    /// exactly one side.
    ///
    /// Invariant: the split never loses or duplicates an example.
    #[test]
    fn prop_split_partitions_trainset(
        n in 2usize..60,
        ratio in 0.05f64..0.95,
        seed in any::<u64>(),
    ) {
        let (train, val) = split_trainset(numbered_examples(n), ratio, seed).unwrap();

        prop_assert_eq!(train.len() + val.len(), n);
        prop_assert!(!train.is_empty());
        prop_assert!(!val.is_empty());

        let mut seen = positions(&train);
        seen.extend(positions(&val));
        seen.sort_unstable();
        prop_assert_eq!(seen, (0..n).collect::<Vec<_>>());
    }

    /// Property: the same seed reproduces the same split.
    #[test]
    fn prop_split_is_deterministic(
        n in 2usize..40,
        ratio in 0.05f64..0.95,
        seed in any::<u64>(),
    ) {
        let first = split_trainset(numbered_examples(n), ratio, seed).unwrap();
        let second = split_trainset(numbered_examples(n), ratio, seed).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Property: minibatches are drawn without replacement from the
    /// validation set and clamp to its size.
    ///
    /// Invariant: no example appears twice in one minibatch.
    #[test]
    fn prop_minibatch_draws_without_replacement(
        n in 1usize..40,
        size in 0usize..60,
        seed in any::<u64>(),
    ) {
        let valset = numbered_examples(n);
        let mut rng = StdRng::seed_from_u64(seed);
        let batch = draw_minibatch(&valset, size, &mut rng);

        prop_assert_eq!(batch.len(), size.min(n));

        let mut drawn = positions(&batch);
        prop_assert!(drawn.iter().all(|&i| i < n));
        drawn.sort_unstable();
        drawn.dedup();
        prop_assert_eq!(drawn.len(), batch.len());
    }

    /// Property: capping keeps at most `cap` examples and preserves their
    /// original relative order; undersized inputs pass through verbatim.
    #[test]
    fn prop_cap_preserves_relative_order(
        n in 0usize..50,
        cap in 0usize..60,
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let capped = cap_examples(numbered_examples(n), cap, &mut rng);

        prop_assert_eq!(capped.len(), n.min(cap));

        let kept = positions(&capped);
        prop_assert!(kept.iter().all(|&i| i < n));
        prop_assert!(kept.windows(2).all(|pair| pair[0] < pair[1]));
        if n <= cap {
            prop_assert_eq!(kept, (0..n).collect::<Vec<_>>());
        }
    }
}

// ============================================================================
// Score Statistics Properties
// ============================================================================

proptest! {
    /// Property: any percentile of a score list lies between its minimum and
    /// maximum, and percentiles are monotone in the requested rank.
    #[test]
    fn prop_percentile_bounded_and_monotone(
        scores in arb_scores(),
        rank_a in 0.0f64..=100.0,
        rank_b in 0.0f64..=100.0,
    ) {
        let (lo_rank, hi_rank) = if rank_a <= rank_b {
            (rank_a, rank_b)
        } else {
            (rank_b, rank_a)
        };
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let lo = percentile(&scores, lo_rank);
        let hi = percentile(&scores, hi_rank);

        prop_assert!(min <= lo);
        prop_assert!(lo <= hi);
        prop_assert!(hi <= max);
    }

    /// Property: the mean of a score list lies within its range up to float
    /// round-off, and the standard deviation is non-negative and finite.
    #[test]
    fn prop_mean_and_std_dev_bounded(scores in arb_scores()) {
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mean = average_score(&scores);
        prop_assert!(mean >= min - 1e-9);
        prop_assert!(mean <= max + 1e-9);

        let sd = std_dev(&scores);
        prop_assert!(sd >= 0.0);
        prop_assert!(sd.is_finite());
    }

    /// Property: a weighted draw over non-empty weights always lands inside
    /// the weight vector, including degenerate all-zero weights.
    #[test]
    fn prop_weighted_index_in_range(
        weights in prop::collection::vec(0.0f64..10.0, 1..12),
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let idx = weighted_index(&weights, &mut rng).unwrap();
        prop_assert!(idx < weights.len());
    }

    /// Property: a score summary keeps its fields ordered: min <= median <=
    /// max, with the mean inside the range and a non-negative deviation.
    #[test]
    fn prop_score_summary_is_ordered(scores in arb_scores()) {
        let summary = ScoreSummary::from_trials(&trials_from_scores(&scores));

        prop_assert!(summary.min <= summary.median);
        prop_assert!(summary.median <= summary.max);
        prop_assert!(summary.mean >= summary.min - 1e-9);
        prop_assert!(summary.mean <= summary.max + 1e-9);
        prop_assert!(summary.std_dev >= 0.0);
    }

    /// Property: failed trials never contribute to the summary.
    ///
    /// Invariant: sentinel scores stay out of reported statistics.
    #[test]
    fn prop_failed_trials_excluded_from_summary(scores in arb_scores()) {
        let mut trials = trials_from_scores(&scores);
        let clean = ScoreSummary::from_trials(&trials);

        trials.push(Trial {
            index: trials.len(),
            assignment: Assignment::baseline(1),
            score: f64::NEG_INFINITY,
            eval: EvalKind::Full,
            failed: true,
        });
        let with_failure = ScoreSummary::from_trials(&trials);

        prop_assert_eq!(clean.min.to_bits(), with_failure.min.to_bits());
        prop_assert_eq!(clean.max.to_bits(), with_failure.max.to_bits());
        prop_assert_eq!(clean.median.to_bits(), with_failure.median.to_bits());
        prop_assert_eq!(clean.mean.to_bits(), with_failure.mean.to_bits());
    }
}

// ============================================================================
// Text Normalization Properties
// ============================================================================

proptest! {
    /// Property: normalization is idempotent: applying it twice is the same
    /// as applying it once.
    #[test]
    fn prop_normalize_text_idempotent(text in arb_messy_text()) {
        let once = normalize_text(&text);
        let twice = normalize_text(&once);
        prop_assert_eq!(twice, once);
    }

    /// Property: normalized text carries no doubled spaces, no tabs, no
    /// leading or trailing whitespace, and no uppercase ASCII.
    #[test]
    fn prop_normalize_text_canonical_form(text in arb_messy_text()) {
        let normalized = normalize_text(&text);

        prop_assert!(!normalized.contains("  "));
        prop_assert!(!normalized.contains('\t'));
        prop_assert_eq!(normalized.trim(), normalized.as_str());
        prop_assert!(!normalized.chars().any(|c| c.is_ascii_uppercase()));
    }
}

// ============================================================================
// Candidate Binding Properties
// ============================================================================

proptest! {
    /// Property: configuring a program is pure: the base program is left
    /// untouched, repeated calls with one assignment agree, and each step
    /// receives exactly the selected instruction candidate.
    #[test]
    fn prop_configure_is_pure(
        num_steps in 1usize..=3,
        num_instructions in 1usize..=4,
        num_demo_sets in 1usize..=3,
        raw_choices in prop::collection::vec((0usize..100, 0usize..100), 3),
    ) {
        let program = program_with_steps(num_steps);
        let instructions: Vec<Vec<String>> = (0..num_steps)
            .map(|s| {
                (0..num_instructions)
                    .map(|c| format!("instruction {s}-{c}"))
                    .collect()
            })
            .collect();
        let demo_sets = vec![vec![Vec::new(); num_demo_sets]; num_steps];
        let pools = CandidatePools::new(&program, instructions.clone(), demo_sets).unwrap();

        let assignment = Assignment {
            choices: raw_choices
                .iter()
                .take(num_steps)
                .map(|&(i, d)| StepChoice {
                    instruction: i % num_instructions,
                    demos: d % num_demo_sets,
                })
                .collect(),
        };

        let before = program.clone();
        let first = pools.configure(&program, &assignment).unwrap();
        let second = pools.configure(&program, &assignment).unwrap();

        prop_assert_eq!(program, before);
        prop_assert_eq!(&first, &second);

        for (idx, step) in first.steps().iter().enumerate() {
            let expected = &instructions[idx][assignment.choices[idx].instruction];
            prop_assert_eq!(step.instruction(), expected.as_str());
        }
    }

    /// Property: the pools' flat dimensions and the sampler agree: any
    /// sampled flat vector rebuilds into an assignment the pools can bind.
    ///
    /// Invariant: the sampler's flat space and the pools' candidate space
    /// are the same space.
    #[test]
    fn prop_sampled_assignments_always_bind(
        num_steps in 1usize..=3,
        num_instructions in 1usize..=4,
        num_demo_sets in 1usize..=3,
        seed in any::<u64>(),
    ) {
        let program = program_with_steps(num_steps);
        let instructions: Vec<Vec<String>> = (0..num_steps)
            .map(|s| {
                (0..num_instructions)
                    .map(|c| format!("instruction {s}-{c}"))
                    .collect()
            })
            .collect();
        let demo_sets = vec![vec![Vec::new(); num_demo_sets]; num_steps];
        let pools = CandidatePools::new(&program, instructions, demo_sets).unwrap();

        prop_assert_eq!(pools.dimensions().len(), num_steps * 2);
        prop_assert_eq!(
            pools.space_size(),
            (num_instructions * num_demo_sets).pow(num_steps as u32)
        );

        let mut sampler = TpeSampler::new(pools.dimensions(), seed).unwrap();
        for _ in 0..10 {
            let flat = sampler.sample();
            let assignment = Assignment::from_flat(&flat).unwrap();
            let configured = pools.configure(&program, &assignment).unwrap();
            prop_assert_eq!(configured.len(), num_steps);
            sampler.record(flat, 0.5);
        }
    }
}
