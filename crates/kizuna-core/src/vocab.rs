//! # Closed Vocabularies
//!
//! Symbol-to-index mappings built once from training data with a minimum
//! frequency cutoff. Unseen symbols resolve to a designated unknown index,
//! never an error. Vocabularies are read-only after construction and are
//! persisted as JSON inside the parser configuration file.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{KizunaError, Result};
use crate::morph::descr_to_feats;

/// Index reserved for padding.
pub const PAD_IDX: usize = 0;
/// Index reserved for unknown symbols.
pub const UNK_IDX: usize = 1;

/// A closed symbol vocabulary with a frequency cutoff.
///
/// Index 0 is padding and index 1 is the unknown symbol; real symbols start
/// at index 2, ordered by first appearance in the training data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    symbols: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    min_count: usize,
}

impl Vocabulary {
    /// Build a vocabulary from sequences of symbols, keeping only symbols
    /// seen at least `min_count` times.
    pub fn train<S: AsRef<str>>(sequences: &[Vec<S>], min_count: usize) -> Self {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for seq in sequences {
            for symbol in seq {
                let symbol = symbol.as_ref();
                let count = counts.entry(symbol).or_insert(0);
                if *count == 0 {
                    order.push(symbol);
                }
                *count += 1;
            }
        }

        let mut symbols = vec!["<pad>".to_string(), "<unk>".to_string()];
        for symbol in order {
            if counts[symbol] >= min_count {
                symbols.push(symbol.to_string());
            }
        }

        let index = Self::build_index(&symbols);
        Self {
            symbols,
            index,
            min_count,
        }
    }

    fn build_index(symbols: &[String]) -> HashMap<String, usize> {
        symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect()
    }

    /// Number of symbols, including padding and unknown.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Returns `true` if the vocabulary holds no real symbols.
    pub fn is_empty(&self) -> bool {
        self.symbols.len() <= 2
    }

    /// Resolve a symbol to its index, falling back to the unknown index.
    pub fn index_of(&self, symbol: &str) -> usize {
        self.index.get(symbol).copied().unwrap_or(UNK_IDX)
    }

    /// Look up the symbol at an index.
    pub fn symbol(&self, idx: usize) -> Option<&str> {
        self.symbols.get(idx).map(String::as_str)
    }

    /// The minimum frequency cutoff this vocabulary was built with.
    pub fn min_count(&self) -> usize {
        self.min_count
    }

    /// Reconstruct a vocabulary from its JSON representation.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let mut vocab: Vocabulary = serde_json::from_value(value.clone())
            .map_err(|e| KizunaError::Vocab(e.to_string()))?;
        vocab.index = Self::build_index(&vocab.symbols);
        Ok(vocab)
    }

    /// Serialize the vocabulary to JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A vocabulary over morphological tag descriptors that encodes each
/// descriptor as a multi-hot feature vector: a one-hot POS block followed
/// by one slot per known `Key=Val` feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVocabulary {
    pos_tags: Vec<String>,
    features: Vec<(String, String)>,
    #[serde(skip)]
    pos_index: HashMap<String, usize>,
    #[serde(skip)]
    feature_index: HashMap<(String, String), usize>,
    min_count: usize,
}

impl FeatureVocabulary {
    /// Build from sequences of tag descriptors, keeping features seen at
    /// least `min_count` times. POS tags are always kept.
    pub fn train<S: AsRef<str>>(sequences: &[Vec<S>], min_count: usize) -> Self {
        let mut pos_tags: Vec<String> = Vec::new();
        let mut feature_counts: HashMap<(String, String), usize> = HashMap::new();
        let mut feature_order: Vec<(String, String)> = Vec::new();

        for seq in sequences {
            for descr in seq {
                let (pos, feats) = descr_to_feats(descr.as_ref());
                if !pos_tags.contains(&pos) {
                    pos_tags.push(pos);
                }
                for pair in feats {
                    let count = feature_counts.entry(pair.clone()).or_insert(0);
                    if *count == 0 {
                        feature_order.push(pair);
                    }
                    *count += 1;
                }
            }
        }

        let features: Vec<(String, String)> = feature_order
            .into_iter()
            .filter(|pair| feature_counts[pair] >= min_count)
            .collect();

        let mut vocab = Self {
            pos_tags,
            features,
            pos_index: HashMap::new(),
            feature_index: HashMap::new(),
            min_count,
        };
        vocab.rebuild_indexes();
        vocab
    }

    fn rebuild_indexes(&mut self) {
        self.pos_index = self
            .pos_tags
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();
        self.feature_index = self
            .features
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), i))
            .collect();
    }

    /// Dimension of the encoded feature vector.
    pub fn vector_size(&self) -> usize {
        self.pos_tags.len() + self.features.len()
    }

    /// Encode a tag descriptor as a multi-hot vector. Unknown POS tags and
    /// features are silently dropped.
    pub fn to_vector(&self, descr: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.vector_size()];
        let (pos, feats) = descr_to_feats(descr);
        if let Some(&i) = self.pos_index.get(&pos) {
            vector[i] = 1.0;
        }
        for pair in feats {
            if let Some(&i) = self.feature_index.get(&pair) {
                vector[self.pos_tags.len() + i] = 1.0;
            }
        }
        vector
    }

    /// Reconstruct from JSON, rebuilding the lookup indexes.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let mut vocab: FeatureVocabulary = serde_json::from_value(value.clone())
            .map_err(|e| KizunaError::Vocab(e.to_string()))?;
        vocab.rebuild_indexes();
        Ok(vocab)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seqs(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|s| s.iter().map(|w| w.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_vocab_min_count() {
        let data = seqs(&[&["a", "b", "a"], &["a", "c"]]);
        let vocab = Vocabulary::train(&data, 2);

        assert_eq!(vocab.index_of("a"), 2);
        assert_eq!(vocab.index_of("b"), UNK_IDX);
        assert_eq!(vocab.index_of("c"), UNK_IDX);
        assert_eq!(vocab.len(), 3);
    }

    #[test]
    fn test_vocab_unknown_fallback() {
        let data = seqs(&[&["a"]]);
        let vocab = Vocabulary::train(&data, 1);
        assert_eq!(vocab.index_of("never-seen"), UNK_IDX);
    }

    #[test]
    fn test_vocab_json_roundtrip() {
        let data = seqs(&[&["nsubj", "obj", "nsubj", "root"]]);
        let vocab = Vocabulary::train(&data, 1);
        let json = vocab.to_json();
        let restored = Vocabulary::from_json(&json).unwrap();

        assert_eq!(restored.len(), vocab.len());
        assert_eq!(restored.index_of("obj"), vocab.index_of("obj"));
        assert_eq!(restored.symbol(2), vocab.symbol(2));
    }

    #[test]
    fn test_feature_vocab_vector() {
        let data = seqs(&[
            &["NOUN,Case=Nom|Number=Sing", "VERB,Aspect=Imp"],
            &["NOUN,Case=Acc|Number=Sing"],
        ]);
        let vocab = FeatureVocabulary::train(&data, 1);

        let v = vocab.to_vector("NOUN,Number=Sing");
        assert_eq!(v.len(), vocab.vector_size());
        assert_eq!(v.iter().filter(|&&x| x == 1.0).count(), 2);

        // Unknown POS and features produce the zero vector.
        let v = vocab.to_vector("XYZ,Foo=Bar");
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_feature_vocab_json_roundtrip() {
        let data = seqs(&[&["NOUN,Case=Nom", "PUNCT"]]);
        let vocab = FeatureVocabulary::train(&data, 1);
        let restored = FeatureVocabulary::from_json(&vocab.to_json()).unwrap();

        assert_eq!(restored.vector_size(), vocab.vector_size());
        assert_eq!(restored.to_vector("NOUN,Case=Nom"), vocab.to_vector("NOUN,Case=Nom"));
    }
}
