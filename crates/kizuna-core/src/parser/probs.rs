//! # Head Probability Normalization
//!
//! Converts raw attachment scores into per-dependent probability
//! distributions over candidate heads. Self-attachment and padding
//! positions are masked to exactly zero before renormalization.

use crate::error::{KizunaError, Result};

/// Normalize a (possibly padded) score matrix for one sentence.
///
/// # Arguments
/// * `scores` - Raw score matrix of at least `(len + 1) x (len + 1)`, where
///   `len` is the number of real words and index 0 is the virtual root
/// * `len` - Number of real words in the sentence
///
/// # Returns
/// A `(len + 1) x (len + 1)` matrix where each dependent row is a proper
/// distribution over its valid heads. Row 0 belongs to the root, which has
/// no head, and is left all-zero.
pub fn head_probabilities(scores: &[Vec<f64>], len: usize) -> Result<Vec<Vec<f64>>> {
    let size = len + 1;
    if scores.len() < size || scores.iter().take(size).any(|row| row.len() < size) {
        return Err(KizunaError::ShapeMismatch {
            rows: scores.len(),
            cols: scores.first().map(Vec::len).unwrap_or(0),
        });
    }

    let mut probs = vec![vec![0.0; size]; size];
    for d in 1..size {
        let row = &scores[d][..size];

        // Stable softmax over the unmasked positions.
        let mut max = f64::NEG_INFINITY;
        for (h, &s) in row.iter().enumerate() {
            if h != d && s > max {
                max = s;
            }
        }
        let mut sum = 0.0;
        for (h, &s) in row.iter().enumerate() {
            if h != d {
                let e = (s - max).exp();
                probs[d][h] = e;
                sum += e;
            }
        }
        for p in probs[d].iter_mut() {
            *p /= sum;
        }
    }
    Ok(probs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_sum_to_one() {
        let scores = vec![
            vec![0.0, 1.0, 2.0, 3.0],
            vec![1.5, 0.2, 0.3, -1.0],
            vec![-2.0, 4.0, 0.0, 1.0],
            vec![0.0, 0.0, 0.0, 0.0],
        ];
        let probs = head_probabilities(&scores, 3).unwrap();

        for row in probs.iter().skip(1) {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_masked_positions_are_zero() {
        // 5x5 input but only 2 real words: heads 3 and 4 are padding.
        let scores = vec![vec![1.0; 5]; 5];
        let probs = head_probabilities(&scores, 2).unwrap();

        assert_eq!(probs.len(), 3);
        for (d, row) in probs.iter().enumerate() {
            assert_eq!(row.len(), 3);
            assert_eq!(row[d], 0.0, "self-attachment must be masked");
        }
        // Root row is excluded entirely.
        assert!(probs[0].iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_rejects_undersized_matrix() {
        let scores = vec![vec![0.0; 2]; 2];
        assert!(matches!(
            head_probabilities(&scores, 2),
            Err(KizunaError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_preserves_argmax() {
        let scores = vec![
            vec![0.0, 0.0, 0.0],
            vec![5.0, 0.0, 1.0],
            vec![0.0, 3.0, 0.0],
        ];
        let probs = head_probabilities(&scores, 2).unwrap();
        assert!(probs[1][0] > probs[1][2]);
        assert!(probs[2][1] > probs[2][0]);
    }
}
