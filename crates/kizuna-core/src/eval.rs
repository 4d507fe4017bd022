//! # Attachment Evaluation
//!
//! Unlabeled attachment accuracy and sentence-level exact match between
//! gold and predicted head sequences.

use crate::error::{KizunaError, Result};

/// Accuracy counts produced by [`evaluate_heads`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadAccuracy {
    /// Words with a correctly predicted head.
    pub correct_words: usize,
    /// Total words compared.
    pub total_words: usize,
    /// Sentences where every head matched.
    pub correct_sentences: usize,
    /// Total sentences compared.
    pub total_sentences: usize,
}

impl HeadAccuracy {
    /// Fraction of words with the correct head.
    pub fn word_accuracy(&self) -> f64 {
        if self.total_words == 0 {
            0.0
        } else {
            self.correct_words as f64 / self.total_words as f64
        }
    }

    /// Fraction of sentences matched exactly.
    pub fn sentence_accuracy(&self) -> f64 {
        if self.total_sentences == 0 {
            0.0
        } else {
            self.correct_sentences as f64 / self.total_sentences as f64
        }
    }
}

/// Compare gold and predicted head sequences.
///
/// A gold sentence that is exactly two positions longer than its prediction
/// is assumed to carry boundary markers; its first and last elements are
/// stripped before comparison. Any other length mismatch is an error.
pub fn evaluate_heads(gold: &[Vec<usize>], predicted: &[Vec<usize>]) -> Result<HeadAccuracy> {
    if gold.len() != predicted.len() {
        return Err(KizunaError::LengthMismatch {
            gold: gold.len(),
            predicted: predicted.len(),
        });
    }

    let mut acc = HeadAccuracy {
        correct_words: 0,
        total_words: 0,
        correct_sentences: 0,
        total_sentences: gold.len(),
    };

    for (gold_sent, pred_sent) in gold.iter().zip(predicted) {
        let gold_sent: &[usize] = if gold_sent.len() == pred_sent.len() + 2 {
            &gold_sent[1..gold_sent.len() - 1]
        } else {
            gold_sent
        };
        if gold_sent.len() != pred_sent.len() {
            return Err(KizunaError::LengthMismatch {
                gold: gold_sent.len(),
                predicted: pred_sent.len(),
            });
        }

        let mut all_equal = true;
        for (&g, &p) in gold_sent.iter().zip(pred_sent) {
            if g == p {
                acc.correct_words += 1;
            } else {
                all_equal = false;
            }
            acc.total_words += 1;
        }
        if all_equal {
            acc.correct_sentences += 1;
        }
    }

    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let acc = evaluate_heads(&[vec![1, 2, 3]], &[vec![1, 2, 3]]).unwrap();
        assert_eq!(acc.word_accuracy(), 1.0);
        assert_eq!(acc.sentence_accuracy(), 1.0);
    }

    #[test]
    fn test_partial_match() {
        let acc = evaluate_heads(&[vec![1, 2, 3]], &[vec![1, 2, 0]]).unwrap();
        assert!((acc.word_accuracy() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(acc.sentence_accuracy(), 0.0);
    }

    #[test]
    fn test_boundary_marker_stripping() {
        // Gold carries <s>/</s> positions; exactly the first and last are
        // dropped before comparison.
        let acc = evaluate_heads(&[vec![9, 1, 2, 3, 9]], &[vec![1, 2, 3]]).unwrap();
        assert_eq!(acc.word_accuracy(), 1.0);
        assert_eq!(acc.correct_sentences, 1);
    }

    #[test]
    fn test_other_length_mismatch_is_error() {
        let err = evaluate_heads(&[vec![1, 2, 3, 4]], &[vec![1, 2, 3]]);
        assert!(matches!(err, Err(KizunaError::LengthMismatch { .. })));

        let err = evaluate_heads(&[vec![1, 2]], &[vec![1, 2], vec![3]]);
        assert!(matches!(err, Err(KizunaError::LengthMismatch { .. })));
    }

    #[test]
    fn test_multiple_sentences() {
        let gold = vec![vec![0, 1], vec![2, 0, 1]];
        let pred = vec![vec![0, 1], vec![2, 1, 1]];
        let acc = evaluate_heads(&gold, &pred).unwrap();
        assert_eq!(acc.correct_words, 4);
        assert_eq!(acc.total_words, 5);
        assert_eq!(acc.correct_sentences, 1);
        assert_eq!(acc.total_sentences, 2);
    }
}
