#![recursion_limit = "512"]

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};

use burn::tensor::backend::Backend;
use burn_ndarray::NdArray;
use burn_wgpu::Wgpu;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

#[cfg(feature = "cuda")]
use burn_cuda::Cuda;

use burn_char_rnn::{
    CheckpointSink, Error, GenerationConfig, GenerationMode, Generator, Snapshot, TrainingConfig,
    WordSettings, init_logging, load_training_config,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sample text from a trained character-level model")]
struct Args {
    /// Additional configuration files applied in order (later overrides earlier).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Vec<PathBuf>,
    /// Snapshot directory, or a checkpoint base holding `epoch-<N>` directories.
    #[arg(long, value_name = "PATH")]
    checkpoint: Option<PathBuf>,
    /// Load the checkpoint written after this epoch.
    #[arg(long)]
    epoch: Option<usize>,
    /// Seed text; overrides `generation.prompt`.
    #[arg(long)]
    prompt: Option<String>,
    /// Number of characters to generate in `chars` mode.
    #[arg(long)]
    length: Option<usize>,
    #[arg(long)]
    temperature: Option<f32>,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Number of distinct words to collect in `words` mode.
    #[arg(long)]
    words: Option<usize>,
    /// RNG seed for reproducible sampling.
    #[arg(long)]
    seed: Option<u64>,
    /// Backend to use for inference.
    #[arg(long, value_enum, default_value_t = BackendArg::Ndarray)]
    backend: BackendArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    Ndarray,
    Wgpu,
    Cuda,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Chars,
    Words,
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
    config_paths.extend(args.config.clone());
    let config = load_training_config(&config_paths)?;

    match args.backend {
        BackendArg::Ndarray => infer_backend::<NdArray<f32>>(&config, &args, "ndarray"),
        BackendArg::Wgpu => infer_backend::<Wgpu<f32>>(&config, &args, "wgpu"),
        BackendArg::Cuda => {
            #[cfg(feature = "cuda")]
            {
                infer_backend::<Cuda<f32>>(&config, &args, "cuda")
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

fn infer_backend<B: Backend>(config: &TrainingConfig, args: &Args, backend_name: &str) -> Result<()> {
    let mut generation = config.generation.clone();
    apply_generation_overrides(&mut generation, args);
    generation.validate()?;

    let device = B::Device::default();

    let base = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| config.checkpoint.base_dir.clone());
    let snapshot_dir = resolve_snapshot_dir(&base, args.epoch)?;
    let snapshot = Snapshot::<B>::load(&snapshot_dir, &device)?;
    info!(
        "loaded epoch {} from {} using {backend_name} backend",
        snapshot.manifest.epoch,
        snapshot_dir.display()
    );

    let generator = Generator::from_snapshot(snapshot, device);
    let mut rng = match generation.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    match generation.mode {
        GenerationMode::Chars => {
            let mut stdout = io::stdout().lock();
            write!(stdout, "{}", generation.prompt)?;
            stdout.flush()?;
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
            if words.len() < settings.words {
                info!(
                    "collected {} of {} requested words before the step limit",
                    words.len(),
                    settings.words
                );
            }
            let mut stdout = io::stdout().lock();
            for word in words {
                writeln!(stdout, "{word}")?;
            }
        }
    }

    Ok(())
}

fn apply_generation_overrides(generation: &mut GenerationConfig, args: &Args) {
    if let Some(prompt) = &args.prompt {
        generation.prompt = prompt.clone();
    }
    if let Some(length) = args.length {
        generation.length = length;
    }
    if let Some(temperature) = args.temperature {
        generation.temperature = temperature;
    }
    if let Some(mode) = args.mode {
        generation.mode = match mode {
            ModeArg::Chars => GenerationMode::Chars,
            ModeArg::Words => GenerationMode::Words,
        };
    }
    if let Some(words) = args.words {
        generation.words = words;
    }
    if args.seed.is_some() {
        generation.seed = args.seed;
    }
}

/// Picks the snapshot to load: an explicit epoch, then a final snapshot in
/// `base` itself, then the newest `epoch-<N>` directory.
fn resolve_snapshot_dir(base: &Path, epoch: Option<usize>) -> Result<PathBuf> {
    let sink = CheckpointSink::new(base);
    if let Some(epoch) = epoch {
        return Ok(sink.epoch_dir(epoch));
    }
    if sink.has_final() {
        return Ok(base.to_path_buf());
    }
    match sink.latest_epoch()? {
        Some(epoch) => Ok(sink.epoch_dir(epoch)),
        None => Err(Error::CheckpointNotFound(base.to_path_buf()).into()),
    }
}
