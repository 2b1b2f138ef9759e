#![recursion_limit = "512"]

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use burn_wgpu::Wgpu;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

#[cfg(feature = "cuda")]
use burn_cuda::Cuda;

use burn_char_rnn::{
    CharRnn, CharVocab, CheckpointSink, Generator, GenerationMode, ModelPredictor, Split, StopReason,
    Trainer, TrainingConfig, WindowDataset, WordSettings, build_model_spec, init_logging,
    load_training_config,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train a character-level recurrent language model")]
struct Args {
    /// Additional configuration files applied in order (later overrides earlier).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Vec<PathBuf>,
    /// Continue from the checkpoint written after this epoch.
    #[arg(long, value_name = "EPOCH")]
    resume: Option<usize>,
    /// Backend to use for training.
    #[arg(long, value_enum, default_value_t = BackendArg::Ndarray)]
    backend: BackendArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    Ndarray,
    Wgpu,
    Cuda,
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut config_paths = vec![PathBuf::from("config/base.toml")];
    config_paths.extend(args.config);
    let config = load_training_config(&config_paths)?;

    let corpus = config
        .corpus
        .load()
        .with_context(|| "failed to prepare training corpus")?;
    let vocab = CharVocab::fit(&corpus)?;
    info!("vocabulary: {} distinct symbols", vocab.len());

    let tokens = vocab.encode(&corpus)?;
    let dataset = WindowDataset::new(
        tokens,
        config.training.window,
        config.training.validation_split,
    )?;
    info!(
        "framed {} examples of window {} ({} train / {} valid)",
        dataset.len(),
        dataset.window(),
        dataset.split_len(Split::Train),
        dataset.split_len(Split::Valid)
    );

    match args.backend {
        BackendArg::Ndarray => {
            train_backend::<Autodiff<NdArray<f32>>>(&config, &vocab, &dataset, args.resume, "ndarray")
        }
        BackendArg::Wgpu => {
            train_backend::<Autodiff<Wgpu<f32>>>(&config, &vocab, &dataset, args.resume, "wgpu")
        }
        BackendArg::Cuda => {
            #[cfg(feature = "cuda")]
            {
                train_backend::<Autodiff<Cuda<f32>>>(&config, &vocab, &dataset, args.resume, "cuda")
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(anyhow!(
                    "cuda backend selected but this build lacks `cuda` feature; rebuild with `--features cuda`"
                ))
            }
        }
    }
}

fn train_backend<B>(
    config: &TrainingConfig,
    vocab: &CharVocab,
    dataset: &WindowDataset,
    resume: Option<usize>,
    backend_name: &str,
) -> Result<()>
where
    B: AutodiffBackend,
{
    let device = B::Device::default();
    let spec = build_model_spec(&config.model, vocab.len(), config.training.window);
    let sink = CheckpointSink::new(&config.checkpoint.base_dir);

    info!(
        "[train:{backend_name}] {} parameters, checkpoints under {}",
        spec.parameter_count(),
        sink.base().display()
    );

    let trainer = Trainer::<B>::new(
        spec,
        config.training.clone(),
        config.optimizer.learning_rate,
        sink,
        device.clone(),
    );
    let (model, report) = trainer.fit(vocab, dataset, resume)?;

    match report.stop_reason {
        StopReason::EarlyStopped { epoch } => {
            info!("stopped early after epoch {epoch}")
        }
        StopReason::EpochBudget => info!("completed {} epochs", report.last_epoch()),
        StopReason::AlreadyComplete => {
            info!("nothing to train; final snapshot refreshed")
        }
    }
    if let (Some(epoch), Some(loss)) = (
        report.early_stopping.best_epoch,
        report.early_stopping.best_loss,
    ) {
        info!("best monitored loss {loss:.4} at epoch {epoch}");
    }
    info!("Training complete on {backend_name}. Generating sample...");

    generate_sample::<B>(config, vocab, model, device)
}

fn generate_sample<B: AutodiffBackend>(
    config: &TrainingConfig,
    vocab: &CharVocab,
    model: CharRnn<B>,
    device: B::Device,
) -> Result<()> {
    let generation = &config.generation;
    let generator = Generator::new(
        ModelPredictor::<B::InnerBackend>::new(model.valid(), device),
        vocab.clone(),
        config.training.window,
    );
    let mut rng = match generation.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    match generation.mode {
        GenerationMode::Chars => {
            let mut stdout = std::io::stdout().lock();
            write!(stdout, "{}", generation.prompt)?;
            generator.generate_chars(
                &generation.prompt,
                generation.length,
                generation.temperature,
                &mut rng,
                &mut stdout,
            )?;
            writeln!(stdout)?;
        }
        GenerationMode::Words => {
            let settings = WordSettings {
                words: generation.words,
                min_len: generation.min_word_len,
                max_len: generation.max_word_len,
            };
            let words = generator.generate_words(
                &generation.prompt,
                settings,
                generation.temperature,
                &mut rng,
            )?;
            println!("{}", words.join("\n"));
        }
    }

    Ok(())
}
