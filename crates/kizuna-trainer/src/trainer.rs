//! Training loops for the attachment, label, and joint models.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use candle_core::{D, DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap, loss};
use tracing::info;

use kizuna_core::embed::Embedder;
use kizuna_core::eval::evaluate_heads;
use kizuna_core::model::{HeadModel, JointModel, LabelModel};
use kizuna_core::parser::{
    Architecture, ChuLiuEdmonds, Parser, ParserConfig, ParserModels, TAG_BOS, TAG_EOS,
    build_tag_tensor, head_probabilities, pair_indexes,
};
use kizuna_core::preprocess::wrap_sentence;
use kizuna_core::vocab::{FeatureVocabulary, Vocabulary};

use crate::data::Sentence;

/// Fits parser models on a treebank and assembles a ready-to-use parser.
pub struct Trainer {
    config: ParserConfig,
    device: Device,
    use_tags: bool,
    decoder: ChuLiuEdmonds,
}

impl Trainer {
    pub fn new(config: ParserConfig, use_tags: bool, device: Device) -> Self {
        Self {
            config,
            device,
            use_tags,
            decoder: ChuLiuEdmonds::new(),
        }
    }

    /// The configuration, including vocabularies embedded during training.
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Train all stages of the configured architecture. Development data
    /// drives early stopping; the best epoch's weights are kept.
    pub fn train(
        &mut self,
        embedder: Arc<dyn Embedder>,
        train: &[Sentence],
        dev: &[Sentence],
    ) -> anyhow::Result<Parser> {
        anyhow::ensure!(!train.is_empty(), "empty training set");
        anyhow::ensure!(!dev.is_empty(), "empty development set");

        let deprels: Vec<Vec<String>> = train.iter().map(|s| s.deprels.clone()).collect();
        let dep_vocab = Vocabulary::train(&deprels, 1);
        let tag_vocab = if self.use_tags {
            let tag_seqs: Vec<Vec<String>> = train
                .iter()
                .map(|s| {
                    let mut seq = Vec::with_capacity(s.tags.len() + 2);
                    seq.push(TAG_BOS.to_string());
                    seq.extend(s.tags.iter().cloned());
                    seq.push(TAG_EOS.to_string());
                    seq
                })
                .collect();
            Some(FeatureVocabulary::train(&tag_seqs, 1))
        } else {
            None
        };
        self.config.dep_vocab = Some(dep_vocab.to_json());
        self.config.tag_vocab = tag_vocab.as_ref().map(FeatureVocabulary::to_json);
        info!(
            labels = dep_vocab.len(),
            tagged = tag_vocab.is_some(),
            sentences = train.len(),
            "vocabularies built"
        );

        let models = match self.config.architecture {
            Architecture::TwoStage => {
                let head = self.train_head(&embedder, train, dev, tag_vocab.as_ref())?;
                let label =
                    self.train_label(&embedder, train, dev, &dep_vocab, tag_vocab.as_ref())?;
                ParserModels::TwoStage { head, label }
            }
            Architecture::Joint => {
                let joint =
                    self.train_joint(&embedder, train, dev, &dep_vocab, tag_vocab.as_ref())?;
                ParserModels::Joint(joint)
            }
        };

        Ok(Parser::from_parts(
            embedder,
            self.device.clone(),
            dep_vocab,
            tag_vocab,
            models,
        ))
    }

    fn train_head(
        &self,
        embedder: &Arc<dyn Embedder>,
        train: &[Sentence],
        dev: &[Sentence],
        tag_vocab: Option<&FeatureVocabulary>,
    ) -> anyhow::Result<HeadModel> {
        let save_file = self
            .config
            .head_model_save_file
            .clone()
            .context("head_model_save_file not set")?;
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let model = HeadModel::new(
            embedder.dim(),
            tag_vocab.map(FeatureVocabulary::vector_size),
            &self.config.head_model_params,
            vb,
        )?;
        let params = self.config.head_train_params.clone();
        let mut opt = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: params.learning_rate,
                ..Default::default()
            },
        )?;

        let mut rng = oorandom::Rand64::new(0x2b3c);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut best = f64::NEG_INFINITY;
        let mut bad_epochs = 0i64;

        for epoch in 1..=params.epochs {
            shuffle(&mut order, &mut rng);
            let mut epoch_loss = 0.0f64;
            let mut batches = 0usize;

            for chunk in order.chunks(params.batch_size) {
                let batch: Vec<&Sentence> = chunk.iter().map(|&i| &train[i]).collect();
                let (words, tags) = self.embed_batch(embedder, &batch, tag_vocab)?;
                let scores = model.forward(&words, tags.as_ref())?;
                let loss = self.attachment_loss(&scores, &batch)?;
                opt.backward_step(&loss)?;
                epoch_loss += loss.to_scalar::<f32>()? as f64;
                batches += 1;
            }

            let accuracy = self.head_dev_accuracy(&model, embedder, dev, tag_vocab)?;
            info!(
                epoch,
                loss = epoch_loss / batches as f64,
                dev_uas = accuracy,
                "head model epoch complete"
            );

            if accuracy > best {
                best = accuracy;
                bad_epochs = 0;
                varmap.save(&save_file)?;
            } else if params.patience >= 0 {
                bad_epochs += 1;
                if bad_epochs > params.patience {
                    info!(epoch, best_uas = best, "head model early stop");
                    break;
                }
            }
        }

        // Restore the best epoch's weights.
        varmap.load(&save_file)?;
        Ok(model)
    }

    fn train_label(
        &self,
        embedder: &Arc<dyn Embedder>,
        train: &[Sentence],
        dev: &[Sentence],
        dep_vocab: &Vocabulary,
        tag_vocab: Option<&FeatureVocabulary>,
    ) -> anyhow::Result<LabelModel> {
        let save_file = self
            .config
            .dep_model_save_file
            .clone()
            .context("dep_model_save_file not set")?;
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let model = LabelModel::new(
            embedder.dim(),
            tag_vocab.map(FeatureVocabulary::vector_size),
            dep_vocab.len(),
            &self.config.dep_model_params,
            vb,
        )?;
        let params = self.config.dep_train_params.clone();
        let mut opt = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: params.learning_rate,
                ..Default::default()
            },
        )?;

        let mut rng = oorandom::Rand64::new(0x7d1e);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut best = f64::NEG_INFINITY;
        let mut bad_epochs = 0i64;

        for epoch in 1..=params.epochs {
            shuffle(&mut order, &mut rng);
            let mut epoch_loss = 0.0f64;
            let mut batches = 0usize;

            for chunk in order.chunks(params.batch_size) {
                let batch: Vec<&Sentence> = chunk.iter().map(|&i| &train[i]).collect();
                let (words, tags) = self.embed_batch(embedder, &batch, tag_vocab)?;
                let (logits, pairs) = label_logits_for(&model, &words, tags.as_ref(), &batch, true, &self.device)?;
                let loss = self.label_loss(&logits, pairs, &batch, dep_vocab)?;
                opt.backward_step(&loss)?;
                epoch_loss += loss.to_scalar::<f32>()? as f64;
                batches += 1;
            }

            let accuracy = self.label_dev_accuracy(&model, embedder, dev, dep_vocab, tag_vocab)?;
            info!(
                epoch,
                loss = epoch_loss / batches as f64,
                dev_label_acc = accuracy,
                "label model epoch complete"
            );

            if accuracy > best {
                best = accuracy;
                bad_epochs = 0;
                varmap.save(&save_file)?;
            } else if params.patience >= 0 {
                bad_epochs += 1;
                if bad_epochs > params.patience {
                    info!(epoch, best_acc = best, "label model early stop");
                    break;
                }
            }
        }

        varmap.load(&save_file)?;
        Ok(model)
    }

    fn train_joint(
        &self,
        embedder: &Arc<dyn Embedder>,
        train: &[Sentence],
        dev: &[Sentence],
        dep_vocab: &Vocabulary,
        tag_vocab: Option<&FeatureVocabulary>,
    ) -> anyhow::Result<JointModel> {
        let save_file = self
            .config
            .joint_model_save_file
            .clone()
            .context("joint_model_save_file not set")?;
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let model = JointModel::new(
            embedder.dim(),
            tag_vocab.map(FeatureVocabulary::vector_size),
            dep_vocab.len(),
            &self.config.joint_model_params,
            vb,
        )?;
        let params = self.config.head_train_params.clone();
        let mut opt = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: params.learning_rate,
                ..Default::default()
            },
        )?;

        let mut rng = oorandom::Rand64::new(0x91af);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut best = f64::NEG_INFINITY;
        let mut bad_epochs = 0i64;

        for epoch in 1..=params.epochs {
            shuffle(&mut order, &mut rng);
            let mut epoch_loss = 0.0f64;
            let mut batches = 0usize;

            for chunk in order.chunks(params.batch_size) {
                let batch: Vec<&Sentence> = chunk.iter().map(|&i| &train[i]).collect();
                let (words, tags) = self.embed_batch(embedder, &batch, tag_vocab)?;
                let gold_heads: Vec<Vec<usize>> = batch.iter().map(|s| s.heads.clone()).collect();
                let pairs = batch.iter().map(|s| s.len()).max().unwrap_or(0);
                let (dep_idx, head_idx) = pair_indexes(&gold_heads, pairs, &self.device)?;
                let (scores, logits) =
                    model.forward(&words, tags.as_ref(), &dep_idx, &head_idx, true)?;
                let loss = (self.attachment_loss(&scores, &batch)?
                    + self.label_loss(&logits, pairs, &batch, dep_vocab)?)?;
                opt.backward_step(&loss)?;
                epoch_loss += loss.to_scalar::<f32>()? as f64;
                batches += 1;
            }

            let accuracy = self.joint_dev_accuracy(&model, embedder, dev, tag_vocab)?;
            info!(
                epoch,
                loss = epoch_loss / batches as f64,
                dev_uas = accuracy,
                "joint model epoch complete"
            );

            if accuracy > best {
                best = accuracy;
                bad_epochs = 0;
                varmap.save(&save_file)?;
            } else if params.patience >= 0 {
                bad_epochs += 1;
                if bad_epochs > params.patience {
                    info!(epoch, best_uas = best, "joint model early stop");
                    break;
                }
            }
        }

        varmap.load(&save_file)?;
        Ok(model)
    }

    /// Embed a batch of wrapped sentences, with the tag channel when
    /// configured.
    fn embed_batch(
        &self,
        embedder: &Arc<dyn Embedder>,
        batch: &[&Sentence],
        tag_vocab: Option<&FeatureVocabulary>,
    ) -> anyhow::Result<(Tensor, Option<Tensor>)> {
        let wrapped: Vec<Vec<String>> = batch.iter().map(|s| wrap_sentence(&s.words)).collect();
        let words = embedder.embed(&wrapped, &self.device)?;
        let tags = match tag_vocab {
            Some(vocab) => {
                let max_len = words.dim(1)?;
                let tag_seqs: Vec<Vec<String>> = batch.iter().map(|s| s.tags.clone()).collect();
                Some(build_tag_tensor(vocab, &tag_seqs, max_len, &self.device)?)
            }
            None => None,
        };
        Ok((words, tags))
    }

    /// Cross-entropy over the gold head position of every real word.
    fn attachment_loss(&self, scores: &Tensor, batch: &[&Sentence]) -> anyhow::Result<Tensor> {
        let (b, l, _) = scores.dims3()?;
        let flat = scores.reshape((b * l, l))?;

        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for (i, sent) in batch.iter().enumerate() {
            for (j, &head) in sent.heads.iter().enumerate() {
                // Word j sits at wrapped position j + 1.
                rows.push((i * l + j + 1) as u32);
                targets.push(head as u32);
            }
        }
        let n = rows.len();
        let rows = Tensor::from_vec(rows, n, &self.device)?;
        let targets = Tensor::from_vec(targets, n, &self.device)?;
        let selected = flat.index_select(&rows, 0)?;
        Ok(loss::cross_entropy(&selected, &targets)?)
    }

    /// Cross-entropy over the gold relation label of every real pair.
    fn label_loss(
        &self,
        logits: &Tensor,
        pairs: usize,
        batch: &[&Sentence],
        dep_vocab: &Vocabulary,
    ) -> anyhow::Result<Tensor> {
        let (b, _p, c) = logits.dims3()?;
        let flat = logits.reshape((b * pairs, c))?;

        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for (i, sent) in batch.iter().enumerate() {
            for (j, deprel) in sent.deprels.iter().enumerate() {
                rows.push((i * pairs + j) as u32);
                targets.push(dep_vocab.index_of(deprel) as u32);
            }
        }
        let n = rows.len();
        let rows = Tensor::from_vec(rows, n, &self.device)?;
        let targets = Tensor::from_vec(targets, n, &self.device)?;
        let selected = flat.index_select(&rows, 0)?;
        Ok(loss::cross_entropy(&selected, &targets)?)
    }

    /// Unlabeled attachment accuracy on the development set, decoding
    /// every sentence into a tree.
    fn head_dev_accuracy(
        &self,
        model: &HeadModel,
        embedder: &Arc<dyn Embedder>,
        dev: &[Sentence],
        tag_vocab: Option<&FeatureVocabulary>,
    ) -> anyhow::Result<f64> {
        self.decode_dev_accuracy(embedder, dev, tag_vocab, |words, tags| {
            model.forward(words, tags)
        })
    }

    fn joint_dev_accuracy(
        &self,
        model: &JointModel,
        embedder: &Arc<dyn Embedder>,
        dev: &[Sentence],
        tag_vocab: Option<&FeatureVocabulary>,
    ) -> anyhow::Result<f64> {
        self.decode_dev_accuracy(embedder, dev, tag_vocab, |words, tags| {
            let encoded = model.encode(words, tags)?;
            model.score_heads(&encoded, false)
        })
    }

    fn decode_dev_accuracy(
        &self,
        embedder: &Arc<dyn Embedder>,
        dev: &[Sentence],
        tag_vocab: Option<&FeatureVocabulary>,
        score: impl Fn(&Tensor, Option<&Tensor>) -> candle_core::Result<Tensor>,
    ) -> anyhow::Result<f64> {
        let batch_size = self.config.head_train_params.batch_size;
        let mut gold = Vec::with_capacity(dev.len());
        let mut predicted = Vec::with_capacity(dev.len());

        for chunk in dev.chunks(batch_size) {
            let batch: Vec<&Sentence> = chunk.iter().collect();
            let (words, tags) = self.embed_batch(embedder, &batch, tag_vocab)?;
            let scores = score(&words, tags.as_ref())?.to_vec3::<f32>()?;

            for (i, sent) in batch.iter().enumerate() {
                let size = sent.len() + 1;
                let raw: Vec<Vec<f64>> = scores[i][..size]
                    .iter()
                    .map(|row| row[..size].iter().map(|&x| x as f64).collect())
                    .collect();
                let probs = head_probabilities(&raw, sent.len())?;
                predicted.push(self.decoder.decode(&probs)?);
                gold.push(sent.heads.clone());
            }
        }

        Ok(evaluate_heads(&gold, &predicted)?.word_accuracy())
    }

    /// Label accuracy on the development set over gold attachments.
    fn label_dev_accuracy(
        &self,
        model: &LabelModel,
        embedder: &Arc<dyn Embedder>,
        dev: &[Sentence],
        dep_vocab: &Vocabulary,
        tag_vocab: Option<&FeatureVocabulary>,
    ) -> anyhow::Result<f64> {
        let batch_size = self.config.dep_train_params.batch_size;
        let mut correct = 0usize;
        let mut total = 0usize;

        for chunk in dev.chunks(batch_size) {
            let batch: Vec<&Sentence> = chunk.iter().collect();
            let (words, tags) = self.embed_batch(embedder, &batch, tag_vocab)?;
            let (logits, _) =
                label_logits_for(model, &words, tags.as_ref(), &batch, false, &self.device)?;
            let predicted = logits.argmax(D::Minus1)?.to_vec2::<u32>()?;

            for (sent, label_ids) in batch.iter().zip(&predicted) {
                for (deprel, &id) in sent.deprels.iter().zip(label_ids) {
                    if dep_vocab.index_of(deprel) == id as usize {
                        correct += 1;
                    }
                    total += 1;
                }
            }
        }

        Ok(correct as f64 / total.max(1) as f64)
    }
}

/// Run the label model over the gold (dependent, head) pairs of a batch.
fn label_logits_for(
    model: &LabelModel,
    words: &Tensor,
    tags: Option<&Tensor>,
    batch: &[&Sentence],
    train: bool,
    device: &Device,
) -> anyhow::Result<(Tensor, usize)> {
    let gold_heads: Vec<Vec<usize>> = batch.iter().map(|s| s.heads.clone()).collect();
    let pairs = batch.iter().map(|s| s.len()).max().unwrap_or(0);
    let (dep_idx, head_idx) = pair_indexes(&gold_heads, pairs, device)?;
    let logits = model.forward(words, tags, &dep_idx, &head_idx, train)?;
    Ok((logits, pairs))
}

fn shuffle(order: &mut [usize], rng: &mut oorandom::Rand64) {
    for i in (1..order.len()).rev() {
        let j = rng.rand_range(0..(i as u64 + 1)) as usize;
        order.swap(i, j);
    }
}

/// Write the trained configuration next to the model save files.
pub fn save_config(config: &ParserConfig, path: &Path) -> anyhow::Result<()> {
    config.save(path)?;
    info!(path = %path.display(), "configuration written");
    Ok(())
}

/// Default save-file layout under an output directory.
pub fn default_save_files(config: &mut ParserConfig, out_dir: &Path) {
    if config.head_model_save_file.is_none() {
        config.head_model_save_file = Some(out_dir.join("head_model.safetensors"));
    }
    if config.dep_model_save_file.is_none() {
        config.dep_model_save_file = Some(out_dir.join("dep_model.safetensors"));
    }
    if config.joint_model_save_file.is_none() {
        config.joint_model_save_file = Some(out_dir.join("joint_model.safetensors"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kizuna_core::embed::LookupEmbedder;

    fn toy_treebank() -> Vec<Sentence> {
        vec![
            Sentence {
                words: vec!["the".into(), "dog".into(), "barks".into()],
                heads: vec![2, 3, 0],
                deprels: vec!["det".into(), "nsubj".into(), "root".into()],
                tags: vec!["DET".into(), "NOUN".into(), "VERB".into()],
            },
            Sentence {
                words: vec!["cats".into(), "sleep".into()],
                heads: vec![2, 0],
                deprels: vec!["nsubj".into(), "root".into()],
                tags: vec!["NOUN".into(), "VERB".into()],
            },
        ]
    }

    fn tiny_config(dir: &Path) -> ParserConfig {
        let mut config = ParserConfig::default();
        config.head_model_params.lstm_size = 4;
        config.head_model_params.state_size = 8;
        config.head_model_params.position_dim = 4;
        config.dep_model_params.lstm_size = 4;
        config.dep_model_params.state_size = 8;
        config.head_train_params.epochs = 1;
        config.dep_train_params.epochs = 1;
        default_save_files(&mut config, dir);
        config
    }

    #[test]
    fn test_two_stage_training_produces_parser() {
        let dir = std::env::temp_dir().join("kizuna-train-test");
        std::fs::create_dir_all(&dir).unwrap();

        let treebank = toy_treebank();
        let words: Vec<Vec<String>> = treebank.iter().map(|s| s.words.clone()).collect();
        let embedder = Arc::new(LookupEmbedder::train(&words, 8, 1).unwrap());

        let mut trainer = Trainer::new(tiny_config(&dir), false, Device::Cpu);
        let parser = trainer
            .train(embedder, &treebank, &treebank)
            .unwrap();

        let (heads, labels) = parser.predict(&words).unwrap();
        assert_eq!(heads[0].len(), 3);
        assert_eq!(labels[1].len(), 2);
        assert!(trainer.config().dep_vocab.is_some());
        assert!(dir.join("head_model.safetensors").exists());
    }

    #[test]
    fn test_save_reload_identical_predictions() {
        let dir = std::env::temp_dir().join("kizuna-train-reload-test");
        std::fs::create_dir_all(&dir).unwrap();

        let treebank = toy_treebank();
        let words: Vec<Vec<String>> = treebank.iter().map(|s| s.words.clone()).collect();
        let embedder = Arc::new(LookupEmbedder::train(&words, 8, 1).unwrap());

        let mut trainer = Trainer::new(tiny_config(&dir), false, Device::Cpu);
        let parser = trainer
            .train(embedder.clone(), &treebank, &treebank)
            .unwrap();

        let config_path = dir.join("config.json");
        save_config(trainer.config(), &config_path).unwrap();
        let reloaded = Parser::load(&config_path, embedder, Device::Cpu).unwrap();

        assert_eq!(
            parser.predict(&words).unwrap(),
            reloaded.predict(&words).unwrap()
        );
    }

    #[test]
    fn test_tagged_training() {
        let dir = std::env::temp_dir().join("kizuna-train-tags-test");
        std::fs::create_dir_all(&dir).unwrap();

        let treebank = toy_treebank();
        let words: Vec<Vec<String>> = treebank.iter().map(|s| s.words.clone()).collect();
        let tags: Vec<Vec<String>> = treebank.iter().map(|s| s.tags.clone()).collect();
        let embedder = Arc::new(LookupEmbedder::train(&words, 8, 1).unwrap());

        let mut trainer = Trainer::new(tiny_config(&dir), true, Device::Cpu);
        let parser = trainer
            .train(embedder, &treebank, &treebank)
            .unwrap();

        let (heads, _) = parser.predict_with_tags(&words, Some(&tags)).unwrap();
        assert_eq!(heads.len(), 2);
        assert!(trainer.config().tag_vocab.is_some());
    }

    #[test]
    fn test_joint_training() {
        let dir = std::env::temp_dir().join("kizuna-train-joint-test");
        std::fs::create_dir_all(&dir).unwrap();

        let treebank = toy_treebank();
        let words: Vec<Vec<String>> = treebank.iter().map(|s| s.words.clone()).collect();
        let embedder = Arc::new(LookupEmbedder::train(&words, 8, 1).unwrap());

        let mut config = tiny_config(&dir);
        config.architecture = Architecture::Joint;
        config.joint_model_params.lstm_size = 4;
        config.joint_model_params.state_size = 8;

        let mut trainer = Trainer::new(config, false, Device::Cpu);
        let parser = trainer.train(embedder, &treebank, &treebank).unwrap();

        let (heads, labels) = parser.predict(&words).unwrap();
        assert_eq!(heads[0].len(), 3);
        assert_eq!(labels[0].len(), 3);
    }
}
