use thiserror::Error;

/// Errors that can occur during Kizuna core operations.
#[derive(Debug, Error)]
pub enum KizunaError {
    /// The input batch contains no sentences, or a sentence has no words.
    #[error("input is empty")]
    EmptyInput,

    /// A score matrix had the wrong shape for decoding.
    #[error("score matrix shape mismatch: expected square of size >= 2, got {rows}x{cols}")]
    ShapeMismatch {
        /// Number of rows in the offending matrix.
        rows: usize,
        /// Number of columns in the offending matrix.
        cols: usize,
    },

    /// Gold and predicted sequences disagree in length during evaluation.
    #[error("sentence length mismatch: gold has {gold} positions, predicted has {predicted}")]
    LengthMismatch {
        /// Gold sequence length.
        gold: usize,
        /// Predicted sequence length.
        predicted: usize,
    },

    /// A batch was ragged: parallel inputs disagree on sentence or word counts.
    #[error("ragged batch: {0}")]
    RaggedBatch(String),

    /// The model weights or configuration file could not be loaded.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// A vocabulary file could not be parsed or is inconsistent.
    #[error("vocabulary error: {0}")]
    Vocab(String),

    /// The embedding provider failed to produce vectors.
    #[error("embedder error: {0}")]
    Embedder(String),

    /// Candle ML framework error.
    #[error("ML inference error: {0}")]
    Candle(String),
}

impl From<candle_core::Error> for KizunaError {
    fn from(e: candle_core::Error) -> Self {
        KizunaError::Candle(e.to_string())
    }
}

/// Result type alias for Kizuna operations.
pub type Result<T> = std::result::Result<T, KizunaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = KizunaError::ShapeMismatch { rows: 3, cols: 4 };
        assert!(err.to_string().contains("3x4"));

        let err = KizunaError::LengthMismatch {
            gold: 5,
            predicted: 4,
        };
        assert!(err.to_string().contains('5'));
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KizunaError>();
    }
}
