//! # Kizuna
//!
//! Graph-based neural dependency parsing: biaffine attachment scoring,
//! exact maximum-spanning-tree decoding, and relation label
//! classification, plus the training loops to fit the models on a
//! CoNLL-U treebank.
//!
//! This crate re-exports the public API of [`kizuna_core`] and
//! [`kizuna_trainer`].

pub use kizuna_core::{
    Architecture, ChuLiuEdmonds, Embedder, FeatureVocabulary, HeadAccuracy, KizunaError,
    LookupEmbedder, Parser, ParserConfig, Result, TransformerEmbedder, Vocabulary,
    evaluate_heads, head_probabilities,
};
pub use kizuna_trainer::{Sentence, Trainer, load_conllu};
