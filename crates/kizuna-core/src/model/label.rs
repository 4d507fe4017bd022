//! # Relation Label Classifier
//!
//! Given a sentence encoding and a set of (dependent, head) index pairs,
//! predicts a dependency-relation label per pair. Pairs come from gold
//! heads during training and from the tree decoder at inference.

use candle_core::{D, Result, Tensor};
use candle_nn::{BatchNorm, BatchNormConfig, Linear, Module, ModuleT, VarBuilder, batch_norm, linear};
use serde::{Deserialize, Serialize};

use crate::model::layers::{BiLstmEncoder, gather_positions};

/// Hyperparameters for the label classifier, stored in the configuration
/// file under `dep_model_params`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelModelParams {
    /// Hidden size per LSTM direction; 0 disables the recurrent encoder.
    pub lstm_size: usize,
    /// Width of the per-role projections.
    pub state_size: usize,
    /// Widths of extra dense layers between the pair state and the
    /// classifier.
    pub dense_sizes: Vec<usize>,
    /// Projection width for tag feature vectors.
    pub tag_embed_size: usize,
}

impl Default for LabelModelParams {
    fn default() -> Self {
        Self {
            lstm_size: 128,
            state_size: 256,
            dense_sizes: Vec::new(),
            tag_embed_size: 64,
        }
    }
}

/// Edge label classification model.
pub struct LabelModel {
    tag_dense: Option<Linear>,
    encoder: Option<BiLstmEncoder>,
    dep_proj: Linear,
    dep_norm: BatchNorm,
    head_proj: Linear,
    head_norm: BatchNorm,
    hidden: Vec<Linear>,
    classifier: Linear,
}

impl LabelModel {
    pub fn new(
        embed_dim: usize,
        tag_dim: Option<usize>,
        num_labels: usize,
        params: &LabelModelParams,
        vb: VarBuilder,
    ) -> Result<Self> {
        let tag_dense = match tag_dim {
            Some(dim) => Some(linear(dim, params.tag_embed_size, vb.pp("tag_dense"))?),
            None => None,
        };
        let input_dim = embed_dim + tag_dim.map(|_| params.tag_embed_size).unwrap_or(0);

        let (encoder, enc_dim) = if params.lstm_size > 0 {
            let enc = BiLstmEncoder::new(input_dim, params.lstm_size, vb.pp("encoder"))?;
            let dim = enc.out_dim();
            (Some(enc), dim)
        } else {
            (None, input_dim)
        };

        let dep_proj = linear(enc_dim, params.state_size, vb.pp("dep_proj"))?;
        let dep_norm = batch_norm(params.state_size, BatchNormConfig::default(), vb.pp("dep_norm"))?;
        let head_proj = linear(enc_dim, params.state_size, vb.pp("head_proj"))?;
        let head_norm = batch_norm(
            params.state_size,
            BatchNormConfig::default(),
            vb.pp("head_norm"),
        )?;

        let mut hidden = Vec::new();
        let mut width = 2 * params.state_size;
        for (i, &units) in params.dense_sizes.iter().enumerate() {
            hidden.push(linear(width, units, vb.pp(format!("dense_{i}")))?);
            width = units;
        }
        let classifier = linear(width, num_labels, vb.pp("classifier"))?;

        Ok(Self {
            tag_dense,
            encoder,
            dep_proj,
            dep_norm,
            head_proj,
            head_norm,
            hidden,
            classifier,
        })
    }

    /// Classify edges. `words`: `[batch, seq_len, embed_dim]`; `dep_idx` and
    /// `head_idx`: `[batch, pairs]` position indexes (u32). Returns
    /// `[batch, pairs, num_labels]` logits.
    pub fn forward(
        &self,
        words: &Tensor,
        tags: Option<&Tensor>,
        dep_idx: &Tensor,
        head_idx: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (b, _l, _e) = words.dims3()?;
        let (_, p) = dep_idx.dims2()?;

        let inputs = match (tags, &self.tag_dense) {
            (Some(tags), Some(dense)) => {
                let tag_emb = dense.forward(tags)?.relu()?;
                Tensor::cat(&[words.clone(), tag_emb], D::Minus1)?
            }
            _ => words.clone(),
        };

        let encoded = match &self.encoder {
            Some(enc) => enc.forward(&inputs)?,
            None => inputs,
        };
        let enc_dim = encoded.dim(2)?;

        let dep_states = gather_positions(&encoded, dep_idx)?.reshape((b * p, enc_dim))?;
        let head_states = gather_positions(&encoded, head_idx)?.reshape((b * p, enc_dim))?;

        let dep = self
            .dep_norm
            .forward_t(&self.dep_proj.forward(&dep_states)?, train)?
            .relu()?;
        let head = self
            .head_norm
            .forward_t(&self.head_proj.forward(&head_states)?, train)?
            .relu()?;

        let mut state = Tensor::cat(&[dep, head], 1)?;
        for layer in &self.hidden {
            state = layer.forward(&state)?.relu()?;
        }
        let logits = self.classifier.forward(&state)?;
        logits.reshape((b, p, ()))
    }
}
