//! # Input Normalization
//!
//! Word and sentence preprocessing shared by training and inference:
//! lower-casing with a retained capitalization marker, and wrapping
//! sentences with explicit boundary tokens.

use crate::error::{KizunaError, Result};

/// Sentence-initial boundary token. Position 0 doubles as the virtual root.
pub const BOS: &str = "<s>";
/// Sentence-final boundary token.
pub const EOS: &str = "</s>";

/// Capitalization of the original surface form, kept as a feature after
/// lower-casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordCase {
    /// All-lowercase or non-alphabetic.
    Lower,
    /// First letter was uppercase.
    FirstUpper,
}

impl WordCase {
    /// Feature value used in embedding inputs.
    pub fn as_feature(&self) -> f32 {
        match self {
            WordCase::Lower => 0.0,
            WordCase::FirstUpper => 1.0,
        }
    }
}

/// Lower-case a word, recording whether its first letter was uppercase.
/// Boundary tokens pass through unchanged.
pub fn process_word(word: &str) -> (String, WordCase) {
    if word == BOS || word == EOS {
        return (word.to_string(), WordCase::Lower);
    }
    let case = match word.chars().next() {
        Some(c) if c.is_uppercase() => WordCase::FirstUpper,
        _ => WordCase::Lower,
    };
    (word.to_lowercase(), case)
}

/// Wrap a sentence with boundary tokens. The leading token also serves as
/// the virtual root position during head prediction.
pub fn wrap_sentence<S: AsRef<str>>(words: &[S]) -> Vec<String> {
    let mut wrapped = Vec::with_capacity(words.len() + 2);
    wrapped.push(BOS.to_string());
    wrapped.extend(words.iter().map(|w| w.as_ref().to_string()));
    wrapped.push(EOS.to_string());
    wrapped
}

/// Reject malformed batches before scoring: empty input, or tag sequences
/// that do not line up with the word sequences.
pub fn validate_batch<S: AsRef<str>, T: AsRef<str>>(
    sentences: &[Vec<S>],
    tags: Option<&[Vec<T>]>,
) -> Result<()> {
    if sentences.is_empty() || sentences.iter().any(|s| s.is_empty()) {
        return Err(KizunaError::EmptyInput);
    }
    if let Some(tags) = tags {
        if tags.len() != sentences.len() {
            return Err(KizunaError::RaggedBatch(format!(
                "{} sentences but {} tag sequences",
                sentences.len(),
                tags.len()
            )));
        }
        for (i, (sent, tag_seq)) in sentences.iter().zip(tags).enumerate() {
            if sent.len() != tag_seq.len() {
                return Err(KizunaError::RaggedBatch(format!(
                    "sentence {} has {} words but {} tags",
                    i,
                    sent.len(),
                    tag_seq.len()
                )));
            }
        }
    }
    Ok(())
}
