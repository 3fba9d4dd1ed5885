//! Cosine similarity and the match decision.

use thiserror::Error;

/// Minimum cosine similarity for two embeddings to count as the same person.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimilarityError {
    #[error("vectors must have the same length (left: {left}, right: {right})")]
    LengthMismatch { left: usize, right: usize },
}

/// Cosine similarity between two equal-length vectors, in [-1, 1].
///
/// A zero vector on either side yields `0.0` instead of NaN. Sums are
/// accumulated left to right so results are reproducible bit for bit.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Match decision: `score >= threshold`.
pub fn decide(score: f64, threshold: f64) -> bool {
    score >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn sample_vectors() -> Vec<Vec<f64>> {
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.3, -0.7, 2.5],
            vec![-1.5, -1.5, 0.25],
            vec![1e-8, 3e-8, -2e-8],
            vec![1e6, -2e6, 5e5],
            vec![0.0, 0.0, 4.0],
        ]
    }

    #[test]
    fn test_identical_vectors_score_one() {
        for v in sample_vectors() {
            let s = cosine_similarity(&v, &v).unwrap();
            assert!((s - 1.0).abs() < EPS, "{v:?} -> {s}");
        }
    }

    #[test]
    fn test_identical_512_dim() {
        let v: Vec<f64> = (0..512).map(|i| ((i * 37 % 101) as f64 - 50.0) / 50.0).collect();
        let s = cosine_similarity(&v, &v).unwrap();
        assert!((s - 1.0).abs() < EPS);
    }

    #[test]
    fn test_symmetric() {
        let vs = sample_vectors();
        for a in &vs {
            for b in &vs {
                assert_eq!(cosine_similarity(a, b).unwrap(), cosine_similarity(b, a).unwrap());
            }
        }
    }

    #[test]
    fn test_result_in_range() {
        let vs = sample_vectors();
        for a in &vs {
            for b in &vs {
                let s = cosine_similarity(a, b).unwrap();
                assert!((-1.0 - EPS..=1.0 + EPS).contains(&s), "{s}");
            }
        }
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let zero = [0.0, 0.0, 0.0];
        let other = [1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&zero, &other).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&other, &zero).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero).unwrap(), 0.0);
    }

    #[test]
    fn test_empty_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]).unwrap(), 0.0);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let err = cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(err, SimilarityError::LengthMismatch { left: 2, right: 3 });
    }

    #[test]
    fn test_opposite_vectors() {
        let s = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!((s + 1.0).abs() < EPS);
    }

    #[test]
    fn test_parallel_vectors_different_magnitude() {
        let s = cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]).unwrap();
        assert!((s - 1.0).abs() < EPS);
        assert!(decide(s, DEFAULT_MATCH_THRESHOLD));
    }

    #[test]
    fn test_orthogonal_vectors_do_not_match() {
        let s = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert_eq!(s, 0.0);
        assert!(!decide(s, DEFAULT_MATCH_THRESHOLD));
    }

    #[test]
    fn test_decide_is_inclusive() {
        assert!(decide(0.8, 0.8));
        assert!(!decide(0.799_999, 0.8));
        assert!(decide(-0.5, -0.5));
    }
}
