//! # Parsing Pipeline
//!
//! Ties the stages together: embed a batch of sentences, score head
//! attachments, normalize the scores, decode each sentence into a tree,
//! and classify a relation label per decoded edge.

pub mod decoder;
pub mod probs;

pub use decoder::ChuLiuEdmonds;
pub use probs::head_probabilities;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{D, DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embed::Embedder;
use crate::error::{KizunaError, Result};
use crate::model::{HeadModel, HeadModelParams, JointModel, JointModelParams, LabelModel, LabelModelParams};
use crate::preprocess::{validate_batch, wrap_sentence};
use crate::vocab::{FeatureVocabulary, Vocabulary};

/// Boundary descriptors used for the tag channel.
pub const TAG_BOS: &str = "BEGIN";
pub const TAG_EOS: &str = "END";

/// Sentences per forward pass at inference time.
const PREDICT_BATCH: usize = 16;

/// Which model arrangement the parser runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// Separate head scorer and label classifier (production path).
    #[default]
    TwoStage,
    /// Single model predicting heads and labels simultaneously.
    Joint,
}

/// Optimization settings for one training stage, stored in the
/// configuration file under `head_train_params` / `dep_train_params`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainParams {
    pub epochs: usize,
    pub batch_size: usize,
    /// Early-stopping patience in epochs; negative disables early stopping.
    pub patience: i64,
    pub learning_rate: f64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 16,
            patience: 1,
            learning_rate: 1e-3,
        }
    }
}

/// On-disk parser configuration. Loading this file reconstructs a fully
/// configured, weight-loaded parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub architecture: Architecture,
    pub head_model_params: HeadModelParams,
    pub dep_model_params: LabelModelParams,
    pub joint_model_params: JointModelParams,
    pub head_train_params: TrainParams,
    pub dep_train_params: TrainParams,
    /// Relation label vocabulary, embedded as JSON.
    pub dep_vocab: Option<serde_json::Value>,
    /// Tag feature vocabulary, embedded as JSON, when tags are used.
    pub tag_vocab: Option<serde_json::Value>,
    pub head_model_save_file: Option<PathBuf>,
    pub dep_model_save_file: Option<PathBuf>,
    pub joint_model_save_file: Option<PathBuf>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::default(),
            head_model_params: HeadModelParams::default(),
            dep_model_params: LabelModelParams::default(),
            joint_model_params: JointModelParams::default(),
            head_train_params: TrainParams::default(),
            // The label classifier converges in fewer passes.
            dep_train_params: TrainParams {
                epochs: 2,
                ..Default::default()
            },
            dep_vocab: None,
            tag_vocab: None,
            head_model_save_file: None,
            dep_model_save_file: None,
            joint_model_save_file: None,
        }
    }
}

impl ParserConfig {
    /// Read a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KizunaError::ModelLoad(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| KizunaError::ModelLoad(e.to_string()))
    }

    /// Write the configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| KizunaError::ModelLoad(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| KizunaError::ModelLoad(e.to_string()))
    }
}

/// Trained model stages owned by a parser.
pub enum ParserModels {
    TwoStage { head: HeadModel, label: LabelModel },
    Joint(JointModel),
}

/// A configured, weight-loaded dependency parser.
pub struct Parser {
    embedder: Arc<dyn Embedder>,
    device: Device,
    dep_vocab: Vocabulary,
    tag_vocab: Option<FeatureVocabulary>,
    models: ParserModels,
    decoder: ChuLiuEdmonds,
}

impl Parser {
    /// Assemble a parser from already-built parts. Used by the trainer
    /// after fitting and by tests.
    pub fn from_parts(
        embedder: Arc<dyn Embedder>,
        device: Device,
        dep_vocab: Vocabulary,
        tag_vocab: Option<FeatureVocabulary>,
        models: ParserModels,
    ) -> Self {
        Self {
            embedder,
            device,
            dep_vocab,
            tag_vocab,
            models,
            decoder: ChuLiuEdmonds::new(),
        }
    }

    /// Reconstruct a parser from a configuration file, loading model
    /// weights from the save files it names. Any load failure is fatal.
    pub fn load(path: &Path, embedder: Arc<dyn Embedder>, device: Device) -> Result<Self> {
        let config = ParserConfig::from_file(path)?;
        let dep_vocab = Vocabulary::from_json(
            config
                .dep_vocab
                .as_ref()
                .ok_or_else(|| KizunaError::ModelLoad("dep_vocab missing from config".into()))?,
        )?;
        let tag_vocab = config
            .tag_vocab
            .as_ref()
            .map(FeatureVocabulary::from_json)
            .transpose()?;
        let tag_dim = tag_vocab.as_ref().map(FeatureVocabulary::vector_size);
        let num_labels = dep_vocab.len();

        let models = match config.architecture {
            Architecture::TwoStage => {
                let head = load_weights(&config.head_model_save_file, "head_model_save_file", |vb| {
                    HeadModel::new(embedder.dim(), tag_dim, &config.head_model_params, vb)
                })?;
                let label = load_weights(&config.dep_model_save_file, "dep_model_save_file", |vb| {
                    LabelModel::new(
                        embedder.dim(),
                        tag_dim,
                        num_labels,
                        &config.dep_model_params,
                        vb,
                    )
                })?;
                ParserModels::TwoStage { head, label }
            }
            Architecture::Joint => {
                let joint =
                    load_weights(&config.joint_model_save_file, "joint_model_save_file", |vb| {
                        JointModel::new(
                            embedder.dim(),
                            tag_dim,
                            num_labels,
                            &config.joint_model_params,
                            vb,
                        )
                    })?;
                ParserModels::Joint(joint)
            }
        };

        debug!(labels = num_labels, "parser loaded");
        Ok(Self::from_parts(embedder, device, dep_vocab, tag_vocab, models))
    }

    /// The relation label vocabulary.
    pub fn dep_vocab(&self) -> &Vocabulary {
        &self.dep_vocab
    }

    /// Predict a head list and a label list per sentence.
    pub fn predict(
        &self,
        sentences: &[Vec<String>],
    ) -> Result<(Vec<Vec<usize>>, Vec<Vec<String>>)> {
        self.predict_with_tags(sentences, None)
    }

    /// Predict with an optional parallel tag channel.
    pub fn predict_with_tags(
        &self,
        sentences: &[Vec<String>],
        tags: Option<&[Vec<String>]>,
    ) -> Result<(Vec<Vec<usize>>, Vec<Vec<String>>)> {
        validate_batch(sentences, tags)?;
        let (_, heads) = self.predict_heads_with_tags(sentences, tags)?;
        let labels = self.predict_labels_with_tags(sentences, &heads, tags)?;
        Ok((heads, labels))
    }

    /// Score, normalize, and decode heads for a batch of sentences.
    /// Returns the per-sentence probability matrices alongside the decoded
    /// head lists.
    pub fn predict_heads_with_tags(
        &self,
        sentences: &[Vec<String>],
        tags: Option<&[Vec<String>]>,
    ) -> Result<(Vec<Vec<Vec<f64>>>, Vec<Vec<usize>>)> {
        let mut all_probs = Vec::with_capacity(sentences.len());
        let mut all_heads = Vec::with_capacity(sentences.len());

        for start in (0..sentences.len()).step_by(PREDICT_BATCH) {
            let end = (start + PREDICT_BATCH).min(sentences.len());
            let chunk = &sentences[start..end];
            let wrapped: Vec<Vec<String>> = chunk.iter().map(|s| wrap_sentence(s)).collect();

            let words = self.embedder.embed(&wrapped, &self.device)?;
            let max_len = words.dim(1)?;
            let tag_tensor = self.tag_tensor(tags.map(|t| &t[start..end]), max_len)?;

            let scores = match &self.models {
                ParserModels::TwoStage { head, .. } => head.forward(&words, tag_tensor.as_ref())?,
                ParserModels::Joint(model) => {
                    let encoded = model.encode(&words, tag_tensor.as_ref())?;
                    model.score_heads(&encoded, false)?
                }
            };
            let scores = scores.to_vec3::<f32>()?;

            for (i, sent) in chunk.iter().enumerate() {
                // Drop the final boundary position: the matrix covers the
                // virtual root plus the real words.
                let size = sent.len() + 1;
                let raw: Vec<Vec<f64>> = scores[i][..size]
                    .iter()
                    .map(|row| row[..size].iter().map(|&x| x as f64).collect())
                    .collect();
                let probs = head_probabilities(&raw, sent.len())?;
                let heads = self.decoder.decode(&probs)?;
                all_probs.push(probs);
                all_heads.push(heads);
            }
        }
        Ok((all_probs, all_heads))
    }

    /// Classify a relation label for each (dependent, head) pair.
    pub fn predict_labels_with_tags(
        &self,
        sentences: &[Vec<String>],
        heads: &[Vec<usize>],
        tags: Option<&[Vec<String>]>,
    ) -> Result<Vec<Vec<String>>> {
        if sentences.len() != heads.len() {
            return Err(KizunaError::LengthMismatch {
                gold: heads.len(),
                predicted: sentences.len(),
            });
        }
        let mut all_labels = Vec::with_capacity(sentences.len());

        for start in (0..sentences.len()).step_by(PREDICT_BATCH) {
            let end = (start + PREDICT_BATCH).min(sentences.len());
            let chunk = &sentences[start..end];
            let chunk_heads = &heads[start..end];
            let wrapped: Vec<Vec<String>> = chunk.iter().map(|s| wrap_sentence(s)).collect();

            let words = self.embedder.embed(&wrapped, &self.device)?;
            let max_len = words.dim(1)?;
            let tag_tensor = self.tag_tensor(tags.map(|t| &t[start..end]), max_len)?;

            let pairs = chunk.iter().map(Vec::len).max().unwrap_or(0);
            let (dep_idx, head_idx) = pair_indexes(chunk_heads, pairs, &self.device)?;

            let logits = match &self.models {
                ParserModels::TwoStage { label, .. } => {
                    label.forward(&words, tag_tensor.as_ref(), &dep_idx, &head_idx, false)?
                }
                ParserModels::Joint(model) => {
                    let encoded = model.encode(&words, tag_tensor.as_ref())?;
                    model.score_labels(&encoded, &dep_idx, &head_idx, false)?
                }
            };
            let predicted = logits.argmax(D::Minus1)?.to_vec2::<u32>()?;

            for (sent, label_ids) in chunk.iter().zip(&predicted) {
                let labels: Vec<String> = label_ids[..sent.len()]
                    .iter()
                    .map(|&id| {
                        self.dep_vocab
                            .symbol(id as usize)
                            .unwrap_or("<unk>")
                            .to_string()
                    })
                    .collect();
                all_labels.push(labels);
            }
        }
        Ok(all_labels)
    }

    /// Build the padded tag feature tensor for a chunk, if the parser was
    /// trained with a tag channel and tags were supplied.
    fn tag_tensor(
        &self,
        tags: Option<&[Vec<String>]>,
        max_len: usize,
    ) -> Result<Option<Tensor>> {
        let (Some(vocab), Some(tags)) = (&self.tag_vocab, tags) else {
            return Ok(None);
        };
        Ok(Some(build_tag_tensor(vocab, tags, max_len, &self.device)?))
    }
}

/// Encode tag descriptors (wrapped with boundary descriptors) as a padded
/// `[batch, max_len, dim]` feature tensor.
pub fn build_tag_tensor(
    vocab: &FeatureVocabulary,
    tags: &[Vec<String>],
    max_len: usize,
    device: &Device,
) -> Result<Tensor> {
    let batch = tags.len();
    let dim = vocab.vector_size();
    let mut data = vec![0.0f32; batch * max_len * dim];
    for (i, sent_tags) in tags.iter().enumerate() {
        let mut wrapped: Vec<&str> = Vec::with_capacity(sent_tags.len() + 2);
        wrapped.push(TAG_BOS);
        wrapped.extend(sent_tags.iter().map(String::as_str));
        wrapped.push(TAG_EOS);
        for (j, descr) in wrapped.iter().enumerate().take(max_len) {
            let vector = vocab.to_vector(descr);
            let offset = (i * max_len + j) * dim;
            data[offset..offset + dim].copy_from_slice(&vector);
        }
    }
    Ok(Tensor::from_vec(data, (batch, max_len, dim), device)?)
}

/// Pack (dependent, head) position pairs into padded u32 index tensors.
/// Dependent `i` sits at wrapped position `i + 1`; its head index is
/// already a wrapped position (0 = virtual root).
pub fn pair_indexes(
    heads: &[Vec<usize>],
    pairs: usize,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let batch = heads.len();
    let mut dep_data = vec![0u32; batch * pairs];
    let mut head_data = vec![0u32; batch * pairs];
    for (i, sent_heads) in heads.iter().enumerate() {
        for (j, &h) in sent_heads.iter().enumerate() {
            dep_data[i * pairs + j] = (j + 1) as u32;
            head_data[i * pairs + j] = h as u32;
        }
    }
    let dep_idx = Tensor::from_vec(dep_data, (batch, pairs), device)?;
    let head_idx = Tensor::from_vec(head_data, (batch, pairs), device)?;
    Ok((dep_idx, head_idx))
}

fn load_weights<M>(
    path: &Option<PathBuf>,
    key: &str,
    build: impl FnOnce(VarBuilder) -> candle_core::Result<M>,
) -> Result<M> {
    let path = path
        .as_ref()
        .ok_or_else(|| KizunaError::ModelLoad(format!("{key} missing from config")))?;
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = build(vb)?;
    varmap
        .load(path)
        .map_err(|e| KizunaError::ModelLoad(format!("{}: {e}", path.display())))?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::LookupEmbedder;

    fn toy_sentences() -> Vec<Vec<String>> {
        vec![
            vec!["the".into(), "dog".into(), "barks".into()],
            vec!["cats".into(), "sleep".into()],
        ]
    }

    fn toy_parser() -> Parser {
        let sentences = toy_sentences();
        let embedder = LookupEmbedder::train(&sentences, 8, 1).unwrap();
        let dep_vocab = Vocabulary::train(
            &[vec!["root".to_string(), "nsubj".to_string(), "det".to_string()]],
            1,
        );
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let params = HeadModelParams {
            lstm_size: 8,
            state_size: 16,
            position_dim: 8,
            ..Default::default()
        };
        let head = HeadModel::new(embedder.dim(), None, &params, vb.pp("head")).unwrap();
        let label_params = LabelModelParams {
            lstm_size: 8,
            state_size: 16,
            ..Default::default()
        };
        let label = LabelModel::new(
            embedder.dim(),
            None,
            dep_vocab.len(),
            &label_params,
            vb.pp("label"),
        )
        .unwrap();

        Parser::from_parts(
            Arc::new(embedder),
            Device::Cpu,
            dep_vocab,
            None,
            ParserModels::TwoStage { head, label },
        )
    }

    #[test]
    fn test_predict_shapes() {
        let parser = toy_parser();
        let sentences = toy_sentences();
        let (heads, labels) = parser.predict(&sentences).unwrap();

        assert_eq!(heads.len(), 2);
        assert_eq!(heads[0].len(), 3);
        assert_eq!(heads[1].len(), 2);
        assert_eq!(labels[0].len(), 3);
        assert_eq!(labels[1].len(), 2);
    }

    #[test]
    fn test_predicted_heads_form_trees() {
        let parser = toy_parser();
        let sentences = toy_sentences();
        let (heads, _) = parser.predict(&sentences).unwrap();

        for sent_heads in &heads {
            let n = sent_heads.len() + 1;
            for start in 1..n {
                let mut v = start;
                let mut steps = 0;
                while v != 0 {
                    v = sent_heads[v - 1];
                    steps += 1;
                    assert!(steps <= n, "cycle in predicted heads");
                }
            }
        }
    }

    #[test]
    fn test_predict_is_deterministic() {
        let parser = toy_parser();
        let sentences = toy_sentences();
        let first = parser.predict(&sentences).unwrap();
        let second = parser.predict(&sentences).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_predict_rejects_empty() {
        let parser = toy_parser();
        assert!(parser.predict(&[]).is_err());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = ParserConfig {
            architecture: Architecture::Joint,
            dep_vocab: Some(Vocabulary::train(&[vec!["nsubj".to_string()]], 1).to_json()),
            ..Default::default()
        };
        let dir = std::env::temp_dir().join("kizuna-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        config.save(&path).unwrap();

        let restored = ParserConfig::from_file(&path).unwrap();
        assert_eq!(restored.architecture, Architecture::Joint);
        assert!(restored.dep_vocab.is_some());
    }

    #[test]
    fn test_pair_indexes_padding() {
        let heads = vec![vec![0usize, 1], vec![0usize]];
        let (dep_idx, head_idx) = pair_indexes(&heads, 2, &Device::Cpu).unwrap();
        assert_eq!(dep_idx.to_vec2::<u32>().unwrap(), vec![vec![1, 2], vec![1, 0]]);
        assert_eq!(head_idx.to_vec2::<u32>().unwrap(), vec![vec![0, 1], vec![0, 0]]);
    }
}
