//! # Head Attachment Scorer
//!
//! Produces a square matrix of raw attachment scores between every
//! dependent and every candidate head position in a sentence, from
//! contextual word representations (plus optional morphological tag
//! features) through a biaffine form over role-specific projections.

use candle_core::{D, Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder, linear};
use serde::{Deserialize, Serialize};

use crate::model::layers::{BiLstmEncoder, Biaffine, PositionEmbedding};

/// Hyperparameters for the head scorer, as stored in the configuration
/// file under `head_model_params`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadModelParams {
    /// Use a bidirectional LSTM encoder; otherwise a tanh dense projection.
    pub use_lstm: bool,
    /// Hidden size per LSTM direction.
    pub lstm_size: usize,
    /// Width of the dense projection when `use_lstm` is off.
    pub dense_size: usize,
    /// Width of the dependent/head role projections.
    pub state_size: usize,
    /// Projection width for tag feature vectors.
    pub tag_embed_size: usize,
    /// Positions beyond this index share one embedding slot.
    pub max_position: usize,
    /// Position embedding dimension.
    pub position_dim: usize,
    /// Add per-role linear bias terms to the biaffine form.
    pub use_bias: bool,
}

impl Default for HeadModelParams {
    fn default() -> Self {
        Self {
            use_lstm: true,
            lstm_size: 128,
            dense_size: 256,
            state_size: 384,
            tag_embed_size: 64,
            max_position: 128,
            position_dim: 128,
            use_bias: false,
        }
    }
}

enum Encoder {
    BiLstm(BiLstmEncoder),
    Dense(Linear),
}

/// Biaffine head-attachment scoring model.
pub struct HeadModel {
    tag_dense: Option<Linear>,
    encoder: Encoder,
    positions: PositionEmbedding,
    dep_mlp: Linear,
    head_mlp: Linear,
    biaffine: Biaffine,
}

impl HeadModel {
    /// Build the model. `embed_dim` is the embedder's declared output
    /// dimension; `tag_dim` is the tag feature vector size when tags are
    /// used.
    pub fn new(
        embed_dim: usize,
        tag_dim: Option<usize>,
        params: &HeadModelParams,
        vb: VarBuilder,
    ) -> Result<Self> {
        let tag_dense = match tag_dim {
            Some(dim) => Some(linear(dim, params.tag_embed_size, vb.pp("tag_dense"))?),
            None => None,
        };
        let input_dim = embed_dim + tag_dim.map(|_| params.tag_embed_size).unwrap_or(0);

        let (encoder, enc_dim) = if params.use_lstm {
            let enc = BiLstmEncoder::new(input_dim, params.lstm_size, vb.pp("encoder"))?;
            let dim = enc.out_dim();
            (Encoder::BiLstm(enc), dim)
        } else {
            let enc = linear(input_dim, params.dense_size, vb.pp("encoder"))?;
            (Encoder::Dense(enc), params.dense_size)
        };

        let positions =
            PositionEmbedding::new(params.max_position, params.position_dim, vb.pp("positions"))?;
        let state_in = enc_dim + params.position_dim;
        let dep_mlp = linear(state_in, params.state_size, vb.pp("dep_mlp"))?;
        let head_mlp = linear(state_in, params.state_size, vb.pp("head_mlp"))?;
        let biaffine = Biaffine::new(params.state_size, params.use_bias, vb.pp("biaffine"))?;

        Ok(Self {
            tag_dense,
            encoder,
            positions,
            dep_mlp,
            head_mlp,
            biaffine,
        })
    }

    /// Score a padded batch.
    ///
    /// `words`: `[batch, seq_len, embed_dim]`, `tags`: optional
    /// `[batch, seq_len, tag_dim]`. Returns `[batch, seq_len, seq_len]`
    /// raw attachment scores, dependents on rows.
    pub fn forward(&self, words: &Tensor, tags: Option<&Tensor>) -> Result<Tensor> {
        let (b, l, _e) = words.dims3()?;

        let inputs = match (tags, &self.tag_dense) {
            (Some(tags), Some(dense)) => {
                let tag_emb = dense.forward(tags)?.relu()?;
                Tensor::cat(&[words.clone(), tag_emb], D::Minus1)?
            }
            _ => words.clone(),
        };

        let encoded = match &self.encoder {
            Encoder::BiLstm(enc) => enc.forward(&inputs)?,
            Encoder::Dense(enc) => enc.forward(&inputs)?.tanh()?,
        };

        let positions = self.positions.forward(b, l, words.device())?;
        let states = Tensor::cat(&[encoded, positions], D::Minus1)?;

        let deps = self.dep_mlp.forward(&states)?.relu()?;
        let heads = self.head_mlp.forward(&states)?.relu()?;
        self.biaffine.forward(&deps, &heads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(params: &HeadModelParams, tag_dim: Option<usize>) -> HeadModel {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        HeadModel::new(10, tag_dim, params, vb).unwrap()
    }

    #[test]
    fn test_forward_shapes() {
        let model = build(&HeadModelParams::default(), None);
        let words = Tensor::randn(0.0f32, 1.0, (2, 6, 10), &Device::Cpu).unwrap();
        let scores = model.forward(&words, None).unwrap();
        assert_eq!(scores.dims(), &[2, 6, 6]);
    }

    #[test]
    fn test_forward_with_tags() {
        let model = build(&HeadModelParams::default(), Some(7));
        let words = Tensor::randn(0.0f32, 1.0, (1, 4, 10), &Device::Cpu).unwrap();
        let tags = Tensor::randn(0.0f32, 1.0, (1, 4, 7), &Device::Cpu).unwrap();
        let scores = model.forward(&words, Some(&tags)).unwrap();
        assert_eq!(scores.dims(), &[1, 4, 4]);
    }

    #[test]
    fn test_dense_encoder_path() {
        let params = HeadModelParams {
            use_lstm: false,
            ..Default::default()
        };
        let model = build(&params, None);
        let words = Tensor::randn(0.0f32, 1.0, (2, 3, 10), &Device::Cpu).unwrap();
        let scores = model.forward(&words, None).unwrap();
        assert_eq!(scores.dims(), &[2, 3, 3]);
    }

    #[test]
    fn test_params_deserialize_partial() {
        let params: HeadModelParams = serde_json::from_str(r#"{"state_size": 128}"#).unwrap();
        assert_eq!(params.state_size, 128);
        assert!(params.use_lstm);
        assert_eq!(params.lstm_size, 128);
    }
}
