//! # Word Embedding Providers
//!
//! The parser treats word vectors as an external collaborator: anything
//! implementing [`Embedder`] can supply a padded `[batch, seq_len, dim]`
//! tensor for a batch of sentences. A vocabulary-backed lookup table is
//! provided for offline use, and a pretrained transformer backend lives in
//! [`transformer`].

mod transformer;

pub use transformer::TransformerEmbedder;

use std::collections::HashMap;

use candle_core::{Device, Tensor};

use crate::error::{KizunaError, Result};
use crate::preprocess::process_word;
use crate::vocab::Vocabulary;

/// A provider of fixed-dimension word vectors with a declared output
/// dimensionality.
pub trait Embedder: Send + Sync {
    /// Output vector dimension per word.
    fn dim(&self) -> usize;

    /// Embed a batch of sentences into a zero-padded
    /// `[batch, max_len, dim]` tensor.
    fn embed(&self, sentences: &[Vec<String>], device: &Device) -> Result<Tensor>;
}

/// Vocabulary-backed embedding table with a trailing capitalization
/// feature dimension. Words are lower-cased before lookup; unseen words
/// resolve to the unknown row.
pub struct LookupEmbedder {
    vocab: Vocabulary,
    table: Vec<f32>,
    table_dim: usize,
}

impl LookupEmbedder {
    /// Build a randomly initialized table over a vocabulary trained from
    /// the given sentences.
    pub fn train<S: AsRef<str>>(
        sentences: &[Vec<S>],
        table_dim: usize,
        min_count: usize,
    ) -> Result<Self> {
        let processed: Vec<Vec<String>> = sentences
            .iter()
            .map(|s| s.iter().map(|w| process_word(w.as_ref()).0).collect())
            .collect();
        let vocab = Vocabulary::train(&processed, min_count);

        let table = Tensor::randn(0.0f32, 1.0, (vocab.len(), table_dim), &Device::Cpu)?
            .to_vec2::<f32>()?
            .into_iter()
            .flatten()
            .collect();

        Ok(Self {
            vocab,
            table,
            table_dim,
        })
    }

    /// Persist the table and vocabulary.
    pub fn save(&self, table_path: &std::path::Path) -> Result<serde_json::Value> {
        let tensor = Tensor::from_vec(
            self.table.clone(),
            (self.vocab.len(), self.table_dim),
            &Device::Cpu,
        )?;
        let tensors = HashMap::from([("table".to_string(), tensor)]);
        candle_core::safetensors::save(&tensors, table_path)?;
        Ok(self.vocab.to_json())
    }

    /// Reload a previously saved table.
    pub fn load(table_path: &std::path::Path, vocab: &serde_json::Value) -> Result<Self> {
        let vocab = Vocabulary::from_json(vocab)?;
        let tensors = candle_core::safetensors::load(table_path, &Device::Cpu)?;
        let tensor = tensors
            .get("table")
            .ok_or_else(|| KizunaError::ModelLoad("embedding table missing".into()))?;
        let (rows, table_dim) = tensor.dims2()?;
        if rows != vocab.len() {
            return Err(KizunaError::ModelLoad(format!(
                "embedding table has {rows} rows but vocabulary has {} symbols",
                vocab.len()
            )));
        }
        let table = tensor.to_vec2::<f32>()?.into_iter().flatten().collect();
        Ok(Self {
            vocab,
            table,
            table_dim,
        })
    }
}

impl Embedder for LookupEmbedder {
    fn dim(&self) -> usize {
        self.table_dim + 1
    }

    fn embed(&self, sentences: &[Vec<String>], device: &Device) -> Result<Tensor> {
        if sentences.is_empty() {
            return Err(KizunaError::EmptyInput);
        }
        let batch = sentences.len();
        let max_len = sentences.iter().map(Vec::len).max().unwrap_or(0);
        let dim = self.dim();

        let mut data = vec![0.0f32; batch * max_len * dim];
        for (i, sent) in sentences.iter().enumerate() {
            for (j, word) in sent.iter().enumerate() {
                let (lower, case) = process_word(word);
                let row = self.vocab.index_of(&lower);
                let offset = (i * max_len + j) * dim;
                let table_offset = row * self.table_dim;
                data[offset..offset + self.table_dim]
                    .copy_from_slice(&self.table[table_offset..table_offset + self.table_dim]);
                data[offset + self.table_dim] = case.as_feature();
            }
        }
        Ok(Tensor::from_vec(data, (batch, max_len, dim), device)?)
    }
}
