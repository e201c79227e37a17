// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Few-shot demonstration candidate generation
//!
//! [`DemoCandidateGenerator`] is the boundary that supplies, per program
//! step, the list of candidate demo sets the search chooses from. Set 0 is
//! always the empty set, so the demo dimension always contains a zero-shot
//! point and the baseline assignment reproduces the student program.
//!
//! [`BootstrapDemoGenerator`] is the built-in implementation:
//!
//! 1. Run the student program over a seeded shuffle of the trainset and keep
//!    the examples whose predictions pass the metric, with predicted outputs
//!    bound in place of the labels (bootstrapped traces).
//! 2. Build candidate sets: the empty set, a seeded sample of raw labeled
//!    examples, then random subsets of the bootstrapped pool.
//!
//! Bootstrapping costs one program invocation per inspected example, so the
//! pool is capped at twice the per-set demo limit.

use std::sync::Arc;

use async_trait::async_trait;
use rand::prelude::*;

use crate::callbacks::InvocationContext;
use crate::dataset::cap_examples;
use crate::error::{Error, Result};
use crate::evaluate::ProgramExecutor;
use crate::example::Example;
use crate::metrics::MetricFn;
use crate::program::{DemoSet, Program};

/// Default cap on bootstrapped demos per candidate set.
pub const DEFAULT_MAX_BOOTSTRAPPED_DEMOS: usize = 4;

/// Default cap on labeled demos in the labeled candidate set.
pub const DEFAULT_MAX_LABELED_DEMOS: usize = 4;

/// Generates candidate demonstration sets for every step of a program.
///
/// Implementations must return one non-empty list of demo sets per step,
/// keep indexing stable within a run, and be deterministic under their
/// configured seed. Index 0 of every list must be the empty set.
#[async_trait]
pub trait DemoCandidateGenerator: Send + Sync {
    /// Generate `num_sets` candidate demo sets per step.
    async fn generate(
        &self,
        program: &Program,
        trainset: &[Example],
        num_sets: usize,
        ctx: &InvocationContext,
    ) -> Result<Vec<Vec<DemoSet>>>;
}

/// Built-in generator that bootstraps demos from the student program's own
/// successful predictions.
pub struct BootstrapDemoGenerator {
    executor: Arc<dyn ProgramExecutor>,
    metric: MetricFn,
    max_bootstrapped_demos: usize,
    max_labeled_demos: usize,
    metric_threshold: Option<f64>,
    seed: u64,
}

impl std::fmt::Debug for BootstrapDemoGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapDemoGenerator")
            .field("max_bootstrapped_demos", &self.max_bootstrapped_demos)
            .field("max_labeled_demos", &self.max_labeled_demos)
            .field("metric_threshold", &self.metric_threshold)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl BootstrapDemoGenerator {
    /// Create a generator with default demo caps.
    #[must_use]
    pub fn new(executor: Arc<dyn ProgramExecutor>, metric: MetricFn) -> Self {
        Self {
            executor,
            metric,
            max_bootstrapped_demos: DEFAULT_MAX_BOOTSTRAPPED_DEMOS,
            max_labeled_demos: DEFAULT_MAX_LABELED_DEMOS,
            metric_threshold: None,
            seed: 9,
        }
    }

    /// Set the cap on bootstrapped demos per candidate set.
    #[must_use]
    pub fn with_max_bootstrapped_demos(mut self, max: usize) -> Self {
        self.max_bootstrapped_demos = max;
        self
    }

    /// Set the cap on labeled demos in the labeled candidate set.
    #[must_use]
    pub fn with_max_labeled_demos(mut self, max: usize) -> Self {
        self.max_labeled_demos = max;
        self
    }

    /// Set the minimum metric score for a prediction to count as a
    /// successful demonstration. Without a threshold, any positive score
    /// counts.
    #[must_use]
    pub fn with_metric_threshold(mut self, threshold: f64) -> Self {
        self.metric_threshold = Some(threshold);
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Run the program over a seeded shuffle of the trainset and collect
    /// examples whose predictions pass the metric, rebound with the
    /// predicted outputs. Stops once the pool is large enough to give the
    /// candidate subsets some variety.
    async fn bootstrap_pool(
        &self,
        program: &Program,
        trainset: &[Example],
        ctx: &InvocationContext,
    ) -> Vec<Example> {
        if self.max_bootstrapped_demos == 0 {
            return Vec::new();
        }
        let target = self.max_bootstrapped_demos.saturating_mul(2);

        let mut order: Vec<usize> = (0..trainset.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        order.shuffle(&mut rng);

        let mut pool = Vec::new();
        for idx in order {
            if pool.len() >= target {
                break;
            }
            let example = &trainset[idx];
            let prediction = match self.executor.call(program, example, ctx).await {
                Ok(prediction) => prediction,
                Err(e) => {
                    tracing::debug!(
                        example = idx,
                        error = %e,
                        "Program call failed during bootstrapping"
                    );
                    continue;
                }
            };
            let score = match (self.metric)(example, &prediction) {
                Ok(score) => score,
                Err(e) => {
                    tracing::debug!(
                        example = idx,
                        error = %e,
                        "Metric failed during bootstrapping"
                    );
                    continue;
                }
            };
            let success = match self.metric_threshold {
                Some(threshold) => score >= threshold,
                None => score > 0.0,
            };
            if success {
                let mut demo = example.clone();
                for (key, value) in prediction.fields() {
                    demo = demo.with_field(key.clone(), value.clone());
                }
                pool.push(demo);
            }
        }

        tracing::debug!(
            num_demos = pool.len(),
            "Generated candidate demonstrations"
        );
        pool
    }

    /// Sample a random subset of 1..=`max_demos` demos from the pool,
    /// without replacement.
    fn random_subset(pool: &[Example], max_demos: usize, rng: &mut StdRng) -> DemoSet {
        let max_to_select = max_demos.min(pool.len());
        if max_to_select == 0 {
            return Vec::new();
        }
        let num_to_select = rng.gen_range(1..=max_to_select);

        let mut indices: Vec<usize> = (0..pool.len()).collect();
        indices.shuffle(rng);

        indices
            .iter()
            .take(num_to_select)
            .map(|&idx| pool[idx].clone())
            .collect()
    }
}

#[async_trait]
impl DemoCandidateGenerator for BootstrapDemoGenerator {
    async fn generate(
        &self,
        program: &Program,
        trainset: &[Example],
        num_sets: usize,
        ctx: &InvocationContext,
    ) -> Result<Vec<Vec<DemoSet>>> {
        if num_sets == 0 {
            return Err(Error::DemoGeneration(
                "At least one demo set per step is required".to_string(),
            ));
        }
        if trainset.is_empty() {
            return Err(Error::DemoGeneration(
                "Cannot generate demo candidates from an empty trainset".to_string(),
            ));
        }

        tracing::info!(
            trainset = trainset.len(),
            num_sets,
            max_bootstrapped_demos = self.max_bootstrapped_demos,
            max_labeled_demos = self.max_labeled_demos,
            "Generating demonstration candidates"
        );

        // Set 0 is always empty so zero-shot stays in the search space.
        let mut sets: Vec<DemoSet> = vec![Vec::new()];

        let mut labeled_rng = StdRng::seed_from_u64(self.seed.wrapping_add(1));
        let labeled = cap_examples(trainset.to_vec(), self.max_labeled_demos, &mut labeled_rng);
        if sets.len() < num_sets && !labeled.is_empty() {
            sets.push(labeled.clone());
        }

        if sets.len() < num_sets {
            let pool = self.bootstrap_pool(program, trainset, ctx).await;
            if pool.is_empty() {
                tracing::warn!("No successful demonstrations found!");
            }
            // Fall back to labeled examples when bootstrapping yields nothing.
            let source = if pool.is_empty() { &labeled } else { &pool };

            let mut subset_rng = StdRng::seed_from_u64(self.seed.wrapping_add(2));
            while sets.len() < num_sets {
                sets.push(Self::random_subset(
                    source,
                    self.max_bootstrapped_demos.max(1),
                    &mut subset_rng,
                ));
            }
        }

        // Every step draws from the same candidate sets; the configurator
        // binds them per step by index.
        Ok(vec![sets; program.len()])
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use crate::callbacks::CallbackManager;
    use crate::metrics::field_exact_match;
    use crate::program::Step;
    use crate::signature::make_signature;

    /// Echoes the `question` field into `answer`, failing on examples whose
    /// question contains "fail".
    struct EchoExecutor;

    #[async_trait]
    impl ProgramExecutor for EchoExecutor {
        async fn call(
            &self,
            _program: &Program,
            input: &Example,
            _ctx: &InvocationContext,
        ) -> Result<Example> {
            let question = input.get_str("question").unwrap_or_default();
            if question.contains("fail") {
                return Err(Error::Generic("executor failure".to_string()));
            }
            Ok(Example::new().with_field("answer", question))
        }
    }

    fn qa_program() -> Program {
        Program::new().with_step(Step::new(
            "qa",
            make_signature("question -> answer", "Answer the question").unwrap(),
        ))
    }

    fn self_consistent_trainset(n: usize) -> Vec<Example> {
        // Label equals the echoed question, so every prediction passes the
        // exact-match metric.
        (0..n)
            .map(|i| {
                Example::new()
                    .with_field("question", format!("q{i}"))
                    .with_field("answer", format!("q{i}"))
                    .with_inputs(&["question"])
            })
            .collect()
    }

    fn exact_metric() -> MetricFn {
        Arc::new(|expected, predicted| Ok(field_exact_match(expected, predicted, "answer")))
    }

    fn generator() -> BootstrapDemoGenerator {
        BootstrapDemoGenerator::new(Arc::new(EchoExecutor), exact_metric()).with_seed(42)
    }

    #[test]
    fn test_defaults() {
        let generator = BootstrapDemoGenerator::new(Arc::new(EchoExecutor), exact_metric());
        assert_eq!(generator.max_bootstrapped_demos, 4);
        assert_eq!(generator.max_labeled_demos, 4);
        assert!(generator.metric_threshold.is_none());
        assert_eq!(generator.seed, 9);
    }

    #[test]
    fn test_builder_chain() {
        let generator = BootstrapDemoGenerator::new(Arc::new(EchoExecutor), exact_metric())
            .with_max_bootstrapped_demos(8)
            .with_max_labeled_demos(2)
            .with_metric_threshold(0.5)
            .with_seed(7);

        assert_eq!(generator.max_bootstrapped_demos, 8);
        assert_eq!(generator.max_labeled_demos, 2);
        assert_eq!(generator.metric_threshold, Some(0.5));
        assert_eq!(generator.seed, 7);
    }

    #[tokio::test]
    async fn test_generate_structure() {
        let ctx = InvocationContext::root(CallbackManager::new());
        let candidates = generator()
            .generate(&qa_program(), &self_consistent_trainset(12), 4, &ctx)
            .await
            .unwrap();

        assert_eq!(candidates.len(), 1);
        let sets = &candidates[0];
        assert_eq!(sets.len(), 4);
        assert!(sets[0].is_empty());
        assert!(!sets[1].is_empty() && sets[1].len() <= 4);
        for set in &sets[2..] {
            assert!(!set.is_empty() && set.len() <= 4);
        }
    }

    #[tokio::test]
    async fn test_generate_per_step_alignment() {
        let program = Program::new()
            .with_step(Step::new(
                "classify",
                make_signature("question -> answer", "Classify").unwrap(),
            ))
            .with_step(Step::new(
                "explain",
                make_signature("question, answer -> explanation", "Explain").unwrap(),
            ));

        let ctx = InvocationContext::root(CallbackManager::new());
        let candidates = generator()
            .generate(&program, &self_consistent_trainset(8), 3, &ctx)
            .await
            .unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0], candidates[1]);
    }

    #[tokio::test]
    async fn test_generate_deterministic_under_seed() {
        let ctx = InvocationContext::root(CallbackManager::new());
        let trainset = self_consistent_trainset(10);

        let first = generator()
            .generate(&qa_program(), &trainset, 5, &ctx)
            .await
            .unwrap();
        let second = generator()
            .generate(&qa_program(), &trainset, 5, &ctx)
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_generate_zero_sets_rejected() {
        let ctx = InvocationContext::root(CallbackManager::new());
        let err = generator()
            .generate(&qa_program(), &self_consistent_trainset(4), 0, &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("demo set"));
    }

    #[tokio::test]
    async fn test_generate_empty_trainset_rejected() {
        let ctx = InvocationContext::root(CallbackManager::new());
        let err = generator()
            .generate(&qa_program(), &[], 3, &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty trainset"));
    }

    #[tokio::test]
    async fn test_generate_falls_back_to_labeled_when_bootstrap_fails() {
        // Every execution fails, so the bootstrapped pool is empty.
        let trainset: Vec<Example> = (0..6)
            .map(|i| {
                Example::new()
                    .with_field("question", format!("fail {i}"))
                    .with_field("answer", format!("a{i}"))
                    .with_inputs(&["question"])
            })
            .collect();

        let ctx = InvocationContext::root(CallbackManager::new());
        let candidates = generator()
            .generate(&qa_program(), &trainset, 4, &ctx)
            .await
            .unwrap();

        let sets = &candidates[0];
        assert_eq!(sets.len(), 4);
        assert!(sets[0].is_empty());
        // Later sets are drawn from the labeled pool instead.
        for set in &sets[2..] {
            assert!(set.iter().all(|d| d.get_str("question").is_some()));
        }
    }

    #[tokio::test]
    async fn test_generate_without_labeled_demos() {
        let generator = BootstrapDemoGenerator::new(Arc::new(EchoExecutor), exact_metric())
            .with_max_labeled_demos(0)
            .with_seed(42);

        let ctx = InvocationContext::root(CallbackManager::new());
        let candidates = generator
            .generate(&qa_program(), &self_consistent_trainset(8), 3, &ctx)
            .await
            .unwrap();

        let sets = &candidates[0];
        assert_eq!(sets.len(), 3);
        assert!(sets[0].is_empty());
        // No labeled set: the remaining sets come straight from the pool.
        assert!(!sets[1].is_empty());
        assert!(!sets[2].is_empty());
    }

    #[tokio::test]
    async fn test_bootstrapped_demos_carry_predicted_outputs() {
        // Labels disagree with the echoed prediction; an always-passing
        // metric lets bootstrapping keep the predicted answer.
        let trainset: Vec<Example> = (0..4)
            .map(|i| {
                Example::new()
                    .with_field("question", format!("q{i}"))
                    .with_field("answer", format!("label{i}"))
                    .with_inputs(&["question"])
            })
            .collect();

        let always_pass: MetricFn = Arc::new(|_, _| Ok(1.0));
        let generator = BootstrapDemoGenerator::new(Arc::new(EchoExecutor), always_pass)
            .with_max_labeled_demos(0)
            .with_seed(42);

        let ctx = InvocationContext::root(CallbackManager::new());
        let candidates = generator
            .generate(&qa_program(), &trainset, 2, &ctx)
            .await
            .unwrap();

        let bootstrapped = &candidates[0][1];
        assert!(!bootstrapped.is_empty());
        for demo in bootstrapped {
            let question = demo.get_str("question").unwrap();
            assert_eq!(demo.get_str("answer").unwrap(), question);
        }
    }

    #[test]
    fn test_random_subset_empty_pool() {
        let mut rng = StdRng::seed_from_u64(42);
        let subset = BootstrapDemoGenerator::random_subset(&[], 4, &mut rng);
        assert!(subset.is_empty());
    }

    #[test]
    fn test_random_subset_single() {
        let mut rng = StdRng::seed_from_u64(42);
        let pool = self_consistent_trainset(1);
        let subset = BootstrapDemoGenerator::random_subset(&pool, 5, &mut rng);
        assert_eq!(subset.len(), 1);
    }

    #[test]
    fn test_random_subset_respects_max() {
        let mut rng = StdRng::seed_from_u64(42);
        let pool = self_consistent_trainset(10);
        for _ in 0..20 {
            let subset = BootstrapDemoGenerator::random_subset(&pool, 3, &mut rng);
            assert!(!subset.is_empty() && subset.len() <= 3);
        }
    }

    #[test]
    fn test_random_subset_reproducible() {
        let pool = self_consistent_trainset(6);

        let mut rng1 = StdRng::seed_from_u64(42);
        let subset1 = BootstrapDemoGenerator::random_subset(&pool, 3, &mut rng1);

        let mut rng2 = StdRng::seed_from_u64(42);
        let subset2 = BootstrapDemoGenerator::random_subset(&pool, 3, &mut rng2);

        assert_eq!(subset1, subset2);
    }
}
