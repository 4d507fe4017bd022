//! Shared neural layers: bidirectional LSTM encoding, learned position
//! embeddings, and the biaffine scoring forms used by both prediction
//! stages.

use candle_core::{D, Result, Tensor};
use candle_nn::{
    Embedding, LSTM, LSTMConfig, Module, RNN, VarBuilder, embedding, init, lstm,
};

/// Bidirectional LSTM over a padded `[batch, seq_len, in_dim]` tensor.
///
/// The backward direction runs over the time-reversed sequence; outputs are
/// concatenated to `[batch, seq_len, 2 * hidden]`.
pub struct BiLstmEncoder {
    fwd: LSTM,
    bwd: LSTM,
    hidden: usize,
}

impl BiLstmEncoder {
    pub fn new(in_dim: usize, hidden: usize, vb: VarBuilder) -> Result<Self> {
        let fwd = lstm(in_dim, hidden, LSTMConfig::default(), vb.pp("fwd"))?;
        let bwd = lstm(in_dim, hidden, LSTMConfig::default(), vb.pp("bwd"))?;
        Ok(Self { fwd, bwd, hidden })
    }

    /// Output dimension per position.
    pub fn out_dim(&self) -> usize {
        2 * self.hidden
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (_b, l, _e) = xs.dims3()?;
        let out_f = self.fwd.states_to_tensor(&self.fwd.seq(xs)?)?;

        let rev_idx: Vec<u32> = (0..l as u32).rev().collect();
        let rev_idx = Tensor::from_vec(rev_idx, l, xs.device())?;
        let rev = xs.index_select(&rev_idx, 1)?.contiguous()?;
        let out_b = self.bwd.states_to_tensor(&self.bwd.seq(&rev)?)?;
        let out_b = out_b.index_select(&rev_idx, 1)?;

        Tensor::cat(&[out_f, out_b], D::Minus1)
    }
}

/// Learned position embeddings with positions clamped at `max_len`.
pub struct PositionEmbedding {
    emb: Embedding,
    max_len: usize,
}

impl PositionEmbedding {
    pub fn new(max_len: usize, dim: usize, vb: VarBuilder) -> Result<Self> {
        let emb = embedding(max_len + 1, dim, vb)?;
        Ok(Self { emb, max_len })
    }

    /// Produce `[batch, seq_len, dim]` position vectors.
    pub fn forward(&self, batch: usize, seq_len: usize, device: &candle_core::Device) -> Result<Tensor> {
        let positions: Vec<u32> = (0..seq_len).map(|i| i.min(self.max_len) as u32).collect();
        let ids = Tensor::from_vec(positions, seq_len, device)?;
        let out = self.emb.forward(&ids)?;
        out.unsqueeze(0)?
            .expand((batch, seq_len, out.dim(1)?))?
            .contiguous()
    }
}

/// Biaffine attachment scorer: `scores[d][h] = dep_d · U · head_h`, with
/// optional per-role linear bias terms.
pub struct Biaffine {
    u: Tensor,
    w_dep: Option<Tensor>,
    w_head: Option<Tensor>,
}

impl Biaffine {
    pub fn new(state: usize, use_bias: bool, vb: VarBuilder) -> Result<Self> {
        let u = vb.get_with_hints((state, state), "u", init::DEFAULT_KAIMING_NORMAL)?;
        let (w_dep, w_head) = if use_bias {
            (
                Some(vb.get_with_hints(state, "w_dep", init::DEFAULT_KAIMING_NORMAL)?),
                Some(vb.get_with_hints(state, "w_head", init::DEFAULT_KAIMING_NORMAL)?),
            )
        } else {
            (None, None)
        };
        Ok(Self { u, w_dep, w_head })
    }

    /// `deps`, `heads`: `[batch, seq_len, state]`. Returns `[batch, seq_len, seq_len]`
    /// with dependents on rows and candidate heads on columns.
    pub fn forward(&self, deps: &Tensor, heads: &Tensor) -> Result<Tensor> {
        let (b, l, s) = deps.dims3()?;
        let proj = deps.reshape((b * l, s))?.matmul(&self.u)?.reshape((b, l, s))?;
        let mut scores = proj.matmul(&heads.transpose(1, 2)?.contiguous()?)?;

        if let Some(w) = &self.w_dep {
            let bias = deps
                .reshape((b * l, s))?
                .matmul(&w.unsqueeze(1)?)?
                .reshape((b, l, 1))?;
            scores = scores.broadcast_add(&bias)?;
        }
        if let Some(w) = &self.w_head {
            let bias = heads
                .reshape((b * l, s))?
                .matmul(&w.unsqueeze(1)?)?
                .reshape((b, 1, l))?;
            scores = scores.broadcast_add(&bias)?;
        }
        Ok(scores)
    }
}

/// Biaffine label classifier over (dependent, head) state pairs:
/// one bilinear form per label, with optional dependent-role, head-role,
/// and label biases.
pub struct BiaffineLabel {
    u: Tensor,
    w_dep: Option<Tensor>,
    w_head: Option<Tensor>,
    bias: Option<Tensor>,
    num_labels: usize,
    state: usize,
}

impl BiaffineLabel {
    pub fn new(state: usize, num_labels: usize, use_bias: bool, vb: VarBuilder) -> Result<Self> {
        let u = vb.get_with_hints(
            (num_labels, state, state),
            "u",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let (w_dep, w_head, bias) = if use_bias {
            (
                Some(vb.get_with_hints((state, num_labels), "w_dep", init::DEFAULT_KAIMING_NORMAL)?),
                Some(vb.get_with_hints((state, num_labels), "w_head", init::DEFAULT_KAIMING_NORMAL)?),
                Some(vb.get_with_hints(num_labels, "bias", init::ZERO)?),
            )
        } else {
            (None, None, None)
        };
        Ok(Self {
            u,
            w_dep,
            w_head,
            bias,
            num_labels,
            state,
        })
    }

    /// `deps`, `heads`: `[n, state]` gathered pair states. Returns
    /// `[n, num_labels]` logits.
    pub fn forward(&self, deps: &Tensor, heads: &Tensor) -> Result<Tensor> {
        let (n, _s) = deps.dims2()?;
        let u = self.u.reshape((self.num_labels * self.state, self.state))?;
        let tmp = heads
            .matmul(&u.t()?)?
            .reshape((n, self.num_labels, self.state))?;
        let mut logits = tmp.broadcast_mul(&deps.unsqueeze(1)?)?.sum(D::Minus1)?;

        if let Some(w) = &self.w_dep {
            logits = logits.broadcast_add(&deps.matmul(w)?)?;
        }
        if let Some(w) = &self.w_head {
            logits = logits.broadcast_add(&heads.matmul(w)?)?;
        }
        if let Some(b) = &self.bias {
            logits = logits.broadcast_add(b)?;
        }
        Ok(logits)
    }
}

/// Gather per-position encoder states at the given indexes.
///
/// `states`: `[batch, seq_len, hidden]`, `idx`: `[batch, pairs]` (u32).
/// Returns `[batch, pairs, hidden]`.
pub fn gather_positions(states: &Tensor, idx: &Tensor) -> Result<Tensor> {
    let (b, _l, h) = states.dims3()?;
    let (_, p) = idx.dims2()?;
    let idx = idx.unsqueeze(2)?.expand((b, p, h))?.contiguous()?;
    states.gather(&idx, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn vb(varmap: &VarMap) -> VarBuilder<'_> {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    #[test]
    fn test_bilstm_shapes() {
        let varmap = VarMap::new();
        let enc = BiLstmEncoder::new(8, 16, vb(&varmap)).unwrap();
        let xs = Tensor::zeros((2, 5, 8), DType::F32, &Device::Cpu).unwrap();
        let out = enc.forward(&xs).unwrap();
        assert_eq!(out.dims(), &[2, 5, 32]);
        assert_eq!(enc.out_dim(), 32);
    }

    #[test]
    fn test_position_embedding_clamps() {
        let varmap = VarMap::new();
        let emb = PositionEmbedding::new(4, 6, vb(&varmap)).unwrap();
        // Sequence longer than max_len: positions past 4 reuse the last slot.
        let out = emb.forward(3, 10, &Device::Cpu).unwrap();
        assert_eq!(out.dims(), &[3, 10, 6]);

        let row4: Vec<f32> = out.get(0).unwrap().get(4).unwrap().to_vec1().unwrap();
        let row9: Vec<f32> = out.get(0).unwrap().get(9).unwrap().to_vec1().unwrap();
        assert_eq!(row4, row9);
    }

    #[test]
    fn test_biaffine_shapes() {
        let varmap = VarMap::new();
        let biaffine = Biaffine::new(16, true, vb(&varmap)).unwrap();
        let deps = Tensor::randn(0.0f32, 1.0, (2, 7, 16), &Device::Cpu).unwrap();
        let heads = Tensor::randn(0.0f32, 1.0, (2, 7, 16), &Device::Cpu).unwrap();
        let scores = biaffine.forward(&deps, &heads).unwrap();
        assert_eq!(scores.dims(), &[2, 7, 7]);
    }

    #[test]
    fn test_biaffine_label_shapes() {
        let varmap = VarMap::new();
        let layer = BiaffineLabel::new(12, 5, true, vb(&varmap)).unwrap();
        let deps = Tensor::randn(0.0f32, 1.0, (9, 12), &Device::Cpu).unwrap();
        let heads = Tensor::randn(0.0f32, 1.0, (9, 12), &Device::Cpu).unwrap();
        let logits = layer.forward(&deps, &heads).unwrap();
        assert_eq!(logits.dims(), &[9, 5]);
    }

    #[test]
    fn test_gather_positions() {
        let states = Tensor::from_vec(
            (0..24).map(|x| x as f32).collect::<Vec<_>>(),
            (1, 4, 6),
            &Device::Cpu,
        )
        .unwrap();
        let idx = Tensor::from_vec(vec![2u32, 0], (1, 2), &Device::Cpu).unwrap();
        let out = gather_positions(&states, &idx).unwrap();
        assert_eq!(out.dims(), &[1, 2, 6]);

        let first: Vec<f32> = out.get(0).unwrap().get(0).unwrap().to_vec1().unwrap();
        assert_eq!(first, (12..18).map(|x| x as f32).collect::<Vec<_>>());
    }
}
