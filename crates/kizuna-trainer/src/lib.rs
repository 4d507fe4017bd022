//! # Kizuna Trainer
//!
//! Treebank loading and the training loops that fit the attachment,
//! label, and joint models, with early stopping against a development
//! set.

pub mod data;
pub mod trainer;

pub use data::{Sentence, load_conllu};
pub use trainer::{Trainer, default_save_files, save_config};
