//! Performance benchmarks for the acquisition sampler and trial machinery
//!
//! Run with: cargo bench --package dashtune
//! Run specific group: cargo bench --package dashtune sampling

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use criterion::{criterion_group, criterion_main, Criterion};

use dashtune::{make_signature, Assignment, CandidatePools, Program, Step, TpeSampler};

// ============================================================================
// Fixtures
// ============================================================================

/// Flat dimensions for `num_steps` steps with `num_candidates` instruction
/// and demo-set candidates each.
fn dimensions(num_steps: usize, num_candidates: usize) -> Vec<usize> {
    vec![num_candidates; num_steps * 2]
}

/// Deterministic synthetic score so replayed histories are identical
/// across runs.
fn synthetic_score(values: &[usize]) -> f64 {
    let sum: usize = values.iter().sum();
    (sum % 10) as f64 / 10.0
}

/// A sampler with `history` recorded observations drawn from itself.
fn warmed_sampler(dims: Vec<usize>, history: usize) -> TpeSampler {
    let mut sampler = TpeSampler::new(dims, 9).unwrap();
    for _ in 0..history {
        let values = sampler.sample();
        let score = synthetic_score(&values);
        sampler.record(values, score);
    }
    sampler
}

fn program_with_steps(num_steps: usize) -> Program {
    let mut program = Program::new();
    for i in 0..num_steps {
        let signature = make_signature("question -> answer", "Answer the question.").unwrap();
        program = program.with_step(Step::new(format!("step{i}"), signature));
    }
    program
}

fn pools_for(program: &Program, num_candidates: usize) -> CandidatePools {
    let instructions = (0..program.len())
        .map(|step| {
            (0..num_candidates)
                .map(|i| format!("Instruction variant {i} for step {step}"))
                .collect()
        })
        .collect();
    let demo_sets = vec![vec![Vec::new(); num_candidates]; program.len()];
    CandidatePools::new(program, instructions, demo_sets).unwrap()
}

// ============================================================================
// Sampling Benchmarks
// ============================================================================

fn bench_sampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampling");

    // Uniform draws: no history yet
    group.bench_function("cold_1_step", |b| {
        let mut sampler = TpeSampler::new(dimensions(1, 10), 9).unwrap();
        b.iter(|| sampler.sample());
    });

    // Density-guided draws after a typical run's worth of history
    group.bench_function("warm_30_obs_1_step", |b| {
        let mut sampler = warmed_sampler(dimensions(1, 10), 30);
        b.iter(|| sampler.sample());
    });

    // Wide space: 10-step program, both dimensions per step
    group.bench_function("warm_30_obs_10_steps", |b| {
        let mut sampler = warmed_sampler(dimensions(10, 10), 30);
        b.iter(|| sampler.sample());
    });

    // Long history
    group.bench_function("warm_200_obs_3_steps", |b| {
        let mut sampler = warmed_sampler(dimensions(3, 10), 200);
        b.iter(|| sampler.sample());
    });

    group.finish();
}

// ============================================================================
// Trial Loop Benchmarks
// ============================================================================

fn bench_trial_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("trial_loop");

    // Full acquisition cycle the search driver runs per trial: sample,
    // score, record. History grows as it would in a real run.
    group.bench_function("sample_record_30_trials_3_steps", |b| {
        b.iter(|| {
            let mut sampler = TpeSampler::new(dimensions(3, 10), 9).unwrap();
            for _ in 0..30 {
                let values = sampler.sample();
                let score = synthetic_score(&values);
                sampler.record(values, score);
            }
            sampler.len()
        });
    });

    group.bench_function("sample_record_100_trials_3_steps", |b| {
        b.iter(|| {
            let mut sampler = TpeSampler::new(dimensions(3, 10), 9).unwrap();
            for _ in 0..100 {
                let values = sampler.sample();
                let score = synthetic_score(&values);
                sampler.record(values, score);
            }
            sampler.len()
        });
    });

    group.finish();
}

// ============================================================================
// Candidate Binding Benchmarks
// ============================================================================

fn bench_candidate_binding(c: &mut Criterion) {
    let mut group = c.benchmark_group("candidate_binding");

    // Per-trial cost of materializing a configured program copy
    group.bench_function("configure_1_step", |b| {
        let program = program_with_steps(1);
        let pools = pools_for(&program, 10);
        let assignment = Assignment::from_flat(&[3, 0]).unwrap();
        b.iter(|| pools.configure(&program, &assignment).unwrap());
    });

    group.bench_function("configure_5_steps", |b| {
        let program = program_with_steps(5);
        let pools = pools_for(&program, 10);
        let assignment = Assignment::from_flat(&[3, 0, 1, 2, 0, 0, 9, 1, 4, 4]).unwrap();
        b.iter(|| pools.configure(&program, &assignment).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_sampling,
    bench_trial_loop,
    bench_candidate_binding
);
criterion_main!(benches);
