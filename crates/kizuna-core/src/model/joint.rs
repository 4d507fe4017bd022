//! # Joint Head + Label Architecture
//!
//! Alternative single-model configuration that predicts head attachments
//! and relation labels simultaneously from a shared recurrent encoder,
//! with a biaffine label layer carrying separate dependent-role,
//! head-role, and label biases. The two-stage pipeline remains the
//! production path; this architecture is selectable through
//! `Architecture::Joint`.

use candle_core::{D, Result, Tensor};
use candle_nn::{Dropout, Linear, Module, VarBuilder, linear};
use serde::{Deserialize, Serialize};

use crate::model::layers::{BiLstmEncoder, Biaffine, BiaffineLabel, gather_positions};

/// Hyperparameters for the joint model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JointModelParams {
    /// Hidden size per LSTM direction.
    pub lstm_size: usize,
    /// Number of stacked bidirectional LSTM layers.
    pub lstm_layers: usize,
    /// Width of the role projections.
    pub state_size: usize,
    /// Dropout applied to role projections during training.
    pub dropout: f32,
    /// Projection width for tag feature vectors.
    pub tag_embed_size: usize,
}

impl Default for JointModelParams {
    fn default() -> Self {
        Self {
            lstm_size: 128,
            lstm_layers: 1,
            state_size: 256,
            dropout: 0.2,
            tag_embed_size: 64,
        }
    }
}

/// Joint attachment and label model sharing one encoder.
pub struct JointModel {
    tag_dense: Option<Linear>,
    encoder: Vec<BiLstmEncoder>,
    dropout: Dropout,
    attach_dep_mlp: Linear,
    attach_head_mlp: Linear,
    attachment: Biaffine,
    label_dep_mlp: Linear,
    label_head_mlp: Linear,
    labeler: BiaffineLabel,
}

impl JointModel {
    pub fn new(
        embed_dim: usize,
        tag_dim: Option<usize>,
        num_labels: usize,
        params: &JointModelParams,
        vb: VarBuilder,
    ) -> Result<Self> {
        let tag_dense = match tag_dim {
            Some(dim) => Some(linear(dim, params.tag_embed_size, vb.pp("tag_dense"))?),
            None => None,
        };
        let input_dim = embed_dim + tag_dim.map(|_| params.tag_embed_size).unwrap_or(0);

        let mut encoder = Vec::new();
        let mut width = input_dim;
        for i in 0..params.lstm_layers.max(1) {
            let layer = BiLstmEncoder::new(width, params.lstm_size, vb.pp(format!("encoder_{i}")))?;
            width = layer.out_dim();
            encoder.push(layer);
        }

        let attach_dep_mlp = linear(width, params.state_size, vb.pp("attach_dep_mlp"))?;
        let attach_head_mlp = linear(width, params.state_size, vb.pp("attach_head_mlp"))?;
        let attachment = Biaffine::new(params.state_size, true, vb.pp("attachment"))?;

        let label_dep_mlp = linear(width, params.state_size, vb.pp("label_dep_mlp"))?;
        let label_head_mlp = linear(width, params.state_size, vb.pp("label_head_mlp"))?;
        let labeler = BiaffineLabel::new(params.state_size, num_labels, true, vb.pp("labeler"))?;

        Ok(Self {
            tag_dense,
            encoder,
            dropout: Dropout::new(params.dropout),
            attach_dep_mlp,
            attach_head_mlp,
            attachment,
            label_dep_mlp,
            label_head_mlp,
            labeler,
        })
    }

    /// Run the shared encoder over the input batch.
    pub fn encode(&self, words: &Tensor, tags: Option<&Tensor>) -> Result<Tensor> {
        let inputs = match (tags, &self.tag_dense) {
            (Some(tags), Some(dense)) => {
                let tag_emb = dense.forward(tags)?.relu()?;
                Tensor::cat(&[words.clone(), tag_emb], D::Minus1)?
            }
            _ => words.clone(),
        };
        let mut encoded = inputs;
        for layer in &self.encoder {
            encoded = layer.forward(&encoded)?;
        }
        Ok(encoded)
    }

    /// Attachment branch: `[batch, seq_len, seq_len]` head scores.
    pub fn score_heads(&self, encoded: &Tensor, train: bool) -> Result<Tensor> {
        let deps = self
            .dropout
            .forward(&self.attach_dep_mlp.forward(encoded)?.relu()?, train)?;
        let heads = self
            .dropout
            .forward(&self.attach_head_mlp.forward(encoded)?.relu()?, train)?;
        self.attachment.forward(&deps, &heads)
    }

    /// Label branch over the given pairs: `[batch, pairs, num_labels]`
    /// logits.
    pub fn score_labels(
        &self,
        encoded: &Tensor,
        dep_idx: &Tensor,
        head_idx: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (b, _l, enc_dim) = encoded.dims3()?;
        let (_, p) = dep_idx.dims2()?;

        let dep_states = gather_positions(encoded, dep_idx)?.reshape((b * p, enc_dim))?;
        let head_states = gather_positions(encoded, head_idx)?.reshape((b * p, enc_dim))?;
        let dep_states = self
            .dropout
            .forward(&self.label_dep_mlp.forward(&dep_states)?.relu()?, train)?;
        let head_states = self
            .dropout
            .forward(&self.label_head_mlp.forward(&head_states)?.relu()?, train)?;
        self.labeler
            .forward(&dep_states, &head_states)?
            .reshape((b, p, ()))
    }

    /// Run both branches in one pass.
    pub fn forward(
        &self,
        words: &Tensor,
        tags: Option<&Tensor>,
        dep_idx: &Tensor,
        head_idx: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let encoded = self.encode(words, tags)?;
        let head_scores = self.score_heads(&encoded, train)?;
        let label_logits = self.score_labels(&encoded, dep_idx, head_idx, train)?;
        Ok((head_scores, label_logits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_joint_forward_shapes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = JointModel::new(10, None, 4, &JointModelParams::default(), vb).unwrap();

        let words = Tensor::randn(0.0f32, 1.0, (2, 5, 10), &Device::Cpu).unwrap();
        let dep_idx = Tensor::from_vec(vec![1u32, 2, 1, 2], (2, 2), &Device::Cpu).unwrap();
        let head_idx = Tensor::from_vec(vec![0u32, 1, 0, 1], (2, 2), &Device::Cpu).unwrap();

        let (scores, logits) = model
            .forward(&words, None, &dep_idx, &head_idx, false)
            .unwrap();
        assert_eq!(scores.dims(), &[2, 5, 5]);
        assert_eq!(logits.dims(), &[2, 2, 4]);
    }

    #[test]
    fn test_stacked_encoder() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let params = JointModelParams {
            lstm_layers: 2,
            ..Default::default()
        };
        let model = JointModel::new(10, None, 4, &params, vb).unwrap();

        let words = Tensor::randn(0.0f32, 1.0, (1, 3, 10), &Device::Cpu).unwrap();
        let dep_idx = Tensor::from_vec(vec![1u32, 2], (1, 2), &Device::Cpu).unwrap();
        let head_idx = Tensor::from_vec(vec![0u32, 1], (1, 2), &Device::Cpu).unwrap();

        let (scores, logits) = model
            .forward(&words, None, &dep_idx, &head_idx, true)
            .unwrap();
        assert_eq!(scores.dims(), &[1, 3, 3]);
        assert_eq!(logits.dims(), &[1, 2, 4]);
    }
}
