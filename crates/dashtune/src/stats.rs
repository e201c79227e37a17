// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Shared score statistics
//!
//! Small numeric helpers used by the evaluator (mean scores), the
//! acquisition sampler (weighted categorical draws), and run reports
//! (score-distribution summaries).

use rand::Rng;

/// Compute average score from a list of scores
pub fn average_score(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Sample an index from a categorical distribution.
///
/// `weights` need not be normalized; non-positive totals fall back to the
/// last index so the caller always gets a value for non-empty input.
///
/// # Returns
///
/// The sampled index, or `None` if `weights` is empty.
pub fn weighted_index(weights: &[f64], rng: &mut impl Rng) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }

    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Some(weights.len() - 1);
    }

    let r: f64 = rng.gen::<f64>() * total;
    let mut cumsum = 0.0;
    for (idx, w) in weights.iter().enumerate() {
        cumsum += w;
        if r <= cumsum {
            return Some(idx);
        }
    }

    // Fallback to last index (handles floating point imprecision)
    Some(weights.len() - 1)
}

/// Compute standard deviation of scores
pub fn std_dev(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }

    let mean = average_score(scores);
    let variance =
        scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (scores.len() - 1) as f64;
    variance.sqrt()
}

/// Compute percentile value from scores
///
/// # Arguments
///
/// * `scores` - Scores to analyze
/// * `percentile` - Percentile to compute (0.0 to 100.0)
pub fn percentile(scores: &[f64], percentile: f64) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }

    let mut sorted: Vec<f64> = scores.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let p = percentile.clamp(0.0, 100.0) / 100.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let idx = ((sorted.len() - 1) as f64 * p) as usize;

    sorted[idx]
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_average_score() {
        assert_eq!(average_score(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(average_score(&[]), 0.0);
        assert_eq!(average_score(&[5.0]), 5.0);
    }

    #[test]
    fn test_weighted_index_respects_zero_weights() {
        let weights = vec![0.0, 1.0, 0.0];
        let mut rng = StdRng::seed_from_u64(17);

        for _ in 0..10 {
            assert_eq!(weighted_index(&weights, &mut rng), Some(1));
        }
    }

    #[test]
    fn test_weighted_index_empty_and_degenerate() {
        let mut rng = StdRng::seed_from_u64(17);
        assert_eq!(weighted_index(&[], &mut rng), None);
        // All-zero weights still yield an index.
        assert_eq!(weighted_index(&[0.0, 0.0], &mut rng), Some(1));
    }

    #[test]
    fn test_weighted_index_unnormalized() {
        // Weights summing to more than 1.0 are fine.
        let weights = vec![10.0, 0.0];
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10 {
            assert_eq!(weighted_index(&weights, &mut rng), Some(0));
        }
    }

    #[test]
    fn test_std_dev() {
        // Known standard deviation: [2, 4, 4, 4, 5, 5, 7, 9] has std_dev ~ 2.14
        let scores = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let sd = std_dev(&scores);
        assert!((sd - 2.138).abs() < 0.01);

        assert_eq!(std_dev(&[1.0]), 0.0);
    }

    #[test]
    fn test_percentile() {
        let scores = vec![1.0, 2.0, 3.0, 4.0, 5.0];

        assert_eq!(percentile(&scores, 0.0), 1.0);
        assert_eq!(percentile(&scores, 50.0), 3.0);
        assert_eq!(percentile(&scores, 100.0), 5.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }
}
