//! Pretrained transformer embedding backend.
//!
//! Wraps a DistilBERT checkpoint loaded from safetensors, mean-pooling
//! wordpiece states back onto whitespace words so the parser sees one
//! contextual vector per word.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::distilbert::{Config as BertConfig, DistilBertModel};
use tokenizers::Tokenizer as HfTokenizer;

use super::Embedder;
use crate::error::{KizunaError, Result};

// Default distilbert dimension.
const HIDDEN_SIZE: usize = 768;

/// DistilBERT-backed contextual word embedder.
pub struct TransformerEmbedder {
    tokenizer: HfTokenizer,
    model: DistilBertModel,
    device: Device,
}

impl TransformerEmbedder {
    /// Load `tokenizer.json`, `config.json` and `model.safetensors` from a
    /// checkpoint directory. Any missing or unreadable file is fatal.
    pub fn from_dir(dir: &Path, device: &Device) -> Result<Self> {
        let tokenizer_path = dir.join("tokenizer.json");
        let tokenizer = HfTokenizer::from_file(&tokenizer_path)
            .map_err(|e| KizunaError::ModelLoad(format!("tokenizer: {e}")))?;

        let config_str = std::fs::read_to_string(dir.join("config.json"))
            .map_err(|e| KizunaError::ModelLoad(format!("config: {e}")))?;
        let config: BertConfig = serde_json::from_str(&config_str)
            .map_err(|e| KizunaError::ModelLoad(format!("config: {e}")))?;

        let weights_path = dir.join("model.safetensors");
        if !weights_path.exists() {
            return Err(KizunaError::ModelLoad(format!(
                "weights not found at {}",
                weights_path.display()
            )));
        }
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)
                .map_err(|e| KizunaError::ModelLoad(e.to_string()))?
        };
        let model = DistilBertModel::load(vb, &config)
            .map_err(|e| KizunaError::Candle(e.to_string()))?;

        Ok(Self {
            tokenizer,
            model,
            device: device.clone(),
        })
    }

    /// Embed one sentence: tokenize, run the transformer, and mean-pool
    /// wordpieces per word index. Words that produce no wordpiece keep a
    /// zero vector.
    fn embed_sentence(&self, words: &[String]) -> Result<Vec<Vec<f32>>> {
        let text = words.join(" ");
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| KizunaError::Embedder(e.to_string()))?;

        let ids = encoding.get_ids();
        if ids.is_empty() {
            return Ok(vec![vec![0.0; HIDDEN_SIZE]; words.len()]);
        }
        let input_ids = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let attention_mask = Tensor::ones_like(&input_ids)?;
        let hidden = self.model.forward(&input_ids, &attention_mask)?;
        let hidden = hidden.squeeze(0)?.to_vec2::<f32>()?;

        let mut vectors = vec![vec![0.0f32; HIDDEN_SIZE]; words.len()];
        let mut counts = vec![0usize; words.len()];
        for (piece, word_id) in encoding.get_word_ids().iter().enumerate() {
            let Some(word_id) = word_id else { continue };
            let w = *word_id as usize;
            if w >= words.len() {
                continue;
            }
            for (acc, &h) in vectors[w].iter_mut().zip(&hidden[piece]) {
                *acc += h;
            }
            counts[w] += 1;
        }
        for (vector, count) in vectors.iter_mut().zip(&counts) {
            if *count > 1 {
                for v in vector.iter_mut() {
                    *v /= *count as f32;
                }
            }
        }
        Ok(vectors)
    }
}

impl Embedder for TransformerEmbedder {
    fn dim(&self) -> usize {
        HIDDEN_SIZE
    }

    fn embed(&self, sentences: &[Vec<String>], device: &Device) -> Result<Tensor> {
        if sentences.is_empty() {
            return Err(KizunaError::EmptyInput);
        }
        let batch = sentences.len();
        let max_len = sentences.iter().map(Vec::len).max().unwrap_or(0);

        let mut data = vec![0.0f32; batch * max_len * HIDDEN_SIZE];
        for (i, sent) in sentences.iter().enumerate() {
            let vectors = self.embed_sentence(sent)?;
            for (j, vector) in vectors.iter().enumerate() {
                let offset = (i * max_len + j) * HIDDEN_SIZE;
                data[offset..offset + HIDDEN_SIZE].copy_from_slice(vector);
            }
        }
        Ok(Tensor::from_vec(
            data,
            (batch, max_len, HIDDEN_SIZE),
            device,
        )?)
    }
}
