use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use candle_core::Device;
use clap::Parser as ClapParser;
use tracing::info;

use kizuna_core::embed::LookupEmbedder;
use kizuna_core::parser::{Architecture, ParserConfig};
use kizuna_trainer::{Trainer, default_save_files, load_conllu, save_config};

/// Train a dependency parser on a CoNLL-U treebank.
#[derive(ClapParser, Debug)]
#[command(name = "train", version, about)]
struct Args {
    /// Training treebank in CoNLL-U format.
    #[arg(long)]
    train: PathBuf,

    /// Development treebank used for early stopping.
    #[arg(long)]
    dev: PathBuf,

    /// Existing configuration file to start from.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for the configuration and model weights.
    #[arg(long, default_value = "models")]
    out_dir: PathBuf,

    /// Feed morphological tag features to the models.
    #[arg(long)]
    use_tags: bool,

    /// Train the joint architecture instead of the two-stage pipeline.
    #[arg(long)]
    joint: bool,

    /// Embedding table dimension for the trained lookup embedder.
    #[arg(long, default_value_t = 100)]
    embed_dim: usize,

    /// Drop words seen fewer times than this from the embedder vocabulary.
    #[arg(long, default_value_t = 3)]
    min_count: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;

    let train = load_conllu(&args.train)
        .with_context(|| format!("reading {}", args.train.display()))?;
    let dev =
        load_conllu(&args.dev).with_context(|| format!("reading {}", args.dev.display()))?;
    info!(train = train.len(), dev = dev.len(), "treebank loaded");

    let mut config = match &args.config {
        Some(path) => ParserConfig::from_file(path)?,
        None => ParserConfig::default(),
    };
    if args.joint {
        config.architecture = Architecture::Joint;
    }
    default_save_files(&mut config, &args.out_dir);

    let words: Vec<Vec<String>> = train.iter().map(|s| s.words.clone()).collect();
    let embedder = LookupEmbedder::train(&words, args.embed_dim, args.min_count)?;
    let embedder_vocab = embedder.save(&args.out_dir.join("embedder.safetensors"))?;
    std::fs::write(
        args.out_dir.join("embedder_vocab.json"),
        serde_json::to_string_pretty(&embedder_vocab)?,
    )?;
    info!(dim = args.embed_dim, "embedder trained");

    let mut trainer = Trainer::new(config, args.use_tags, Device::Cpu);
    trainer.train(Arc::new(embedder), &train, &dev)?;

    save_config(trainer.config(), &args.out_dir.join("config.json"))?;
    info!(out_dir = %args.out_dir.display(), "training complete");
    Ok(())
}
