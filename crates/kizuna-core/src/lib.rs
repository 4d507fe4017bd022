//! # Kizuna Core
//!
//! The heart of the Kizuna dependency parser. Provides biaffine neural
//! attachment scoring, exact maximum-spanning-tree decoding, relation
//! label classification, and the vocabularies and evaluation metrics
//! around them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use candle_core::Device;
//! use kizuna_core::embed::LookupEmbedder;
//! use kizuna_core::parser::Parser;
//!
//! let embedder = LookupEmbedder::load(Path::new("table.safetensors"), &serde_json::json!({
//!     "symbols": ["<pad>", "<unk>"], "min_count": 1,
//! })).unwrap();
//! let parser = Parser::load(Path::new("config.json"), Arc::new(embedder), Device::Cpu).unwrap();
//!
//! let sentences = vec![vec!["the".to_string(), "dog".to_string(), "barks".to_string()]];
//! let (heads, labels) = parser.predict(&sentences).unwrap();
//! assert_eq!(heads[0].len(), 3);
//! assert_eq!(labels[0].len(), 3);
//! ```
pub mod embed;
pub mod error;
pub mod eval;
pub mod model;
pub mod morph;
pub mod parser;
pub mod preprocess;
pub mod vocab;

// Re-export primary API
pub use embed::{Embedder, LookupEmbedder, TransformerEmbedder};
pub use error::{KizunaError, Result};
pub use eval::{HeadAccuracy, evaluate_heads};
pub use parser::{Architecture, ChuLiuEdmonds, Parser, ParserConfig, head_probabilities};
pub use vocab::{FeatureVocabulary, Vocabulary};
