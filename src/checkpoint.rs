//! Snapshot persistence.
//!
//! A snapshot directory holds everything needed to rebuild a trained network
//! without the training configuration:
//!
//! ```text
//! <base>/epoch-<N>/manifest.json   format version, epoch, architecture, progress
//! <base>/epoch-<N>/vocab.json      ordered symbol list
//! <base>/epoch-<N>/model.bin       weights
//! <base>/epoch-<N>/optimizer.bin   Adam moments
//! ```
//!
//! `<base>` itself holds the final snapshot with the same file names.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::module::Module;
use burn::optim::Optimizer;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Record, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Error;
use crate::model::{CharRnn, ModelSpec};
use crate::tokenizer::CharVocab;
use crate::trainer::{EarlyStopping, EpochSummary};

pub const FORMAT_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";
pub const VOCAB_FILE: &str = "vocab.json";
const MODEL_STEM: &str = "model";
const OPTIMIZER_STEM: &str = "optimizer";
const EPOCH_PREFIX: &str = "epoch-";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    /// Epochs completed when the snapshot was taken.
    pub epoch: usize,
    pub model: ModelSpec,
    pub early_stopping: EarlyStopping,
    /// Figures of the last completed epoch, if any ran in this session.
    pub metrics: Option<EpochSummary>,
}

impl Manifest {
    pub fn new(
        epoch: usize,
        model: ModelSpec,
        early_stopping: EarlyStopping,
        metrics: Option<EpochSummary>,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            epoch,
            model,
            early_stopping,
            metrics,
        }
    }
}

/// Writes snapshots under a base directory.
#[derive(Clone, Debug)]
pub struct CheckpointSink {
    base: PathBuf,
}

impl CheckpointSink {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn epoch_dir(&self, epoch: usize) -> PathBuf {
        self.base.join(format!("{EPOCH_PREFIX}{epoch}"))
    }

    /// Persists the snapshot for `manifest.epoch` to `<base>/epoch-<N>`.
    ///
    /// Files are staged in a hidden sibling directory and renamed into place,
    /// so an interrupted write never leaves a partial `epoch-<N>`.
    pub fn save_epoch<B, R>(
        &self,
        manifest: &Manifest,
        vocab: &CharVocab,
        model: &CharRnn<B>,
        optimizer: R,
    ) -> Result<PathBuf>
    where
        B: Backend,
        R: Record<B>,
    {
        self.ensure_base()?;

        let target = self.epoch_dir(manifest.epoch);
        let staging = self
            .base
            .join(format!(".{EPOCH_PREFIX}{}.partial", manifest.epoch));
        if staging.exists() {
            fs::remove_dir_all(&staging).with_context(|| {
                format!("failed to clear stale staging directory {}", staging.display())
            })?;
        }
        fs::create_dir_all(&staging)
            .with_context(|| format!("failed to create {}", staging.display()))?;

        write_snapshot(&staging, manifest, vocab, model, optimizer)?;

        if target.exists() {
            warn!("replacing existing checkpoint {}", target.display());
            fs::remove_dir_all(&target)
                .with_context(|| format!("failed to replace {}", target.display()))?;
        }
        fs::rename(&staging, &target).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                staging.display(),
                target.display()
            )
        })?;

        info!(
            "saved model after epoch {} -> {}",
            manifest.epoch,
            target.display()
        );
        Ok(target)
    }

    /// Persists the end-of-training snapshot directly into `<base>`.
    pub fn save_final<B, R>(
        &self,
        manifest: &Manifest,
        vocab: &CharVocab,
        model: &CharRnn<B>,
        optimizer: R,
    ) -> Result<PathBuf>
    where
        B: Backend,
        R: Record<B>,
    {
        self.ensure_base()?;

        // The manifest is written last; removing the old one first means a
        // torn write is reported as a corrupt snapshot on load.
        let manifest_path = self.base.join(MANIFEST_FILE);
        if manifest_path.exists() {
            fs::remove_file(&manifest_path)
                .with_context(|| format!("failed to replace {}", manifest_path.display()))?;
        }
        write_snapshot(&self.base, manifest, vocab, model, optimizer)?;

        info!("saved final model -> {}", self.base.display());
        Ok(self.base.clone())
    }

    /// Epoch numbers of the checkpoints present, ascending.
    pub fn epochs(&self) -> Result<Vec<usize>> {
        if !self.base.is_dir() {
            return Ok(Vec::new());
        }

        let mut epochs = Vec::new();
        for entry in fs::read_dir(&self.base)
            .with_context(|| format!("failed to read checkpoint directory {}", self.base.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(epoch) = parse_epoch_dir(&entry.file_name().to_string_lossy()) {
                epochs.push(epoch);
            }
        }
        epochs.sort_unstable();
        Ok(epochs)
    }

    pub fn latest_epoch(&self) -> Result<Option<usize>> {
        Ok(self.epochs()?.last().copied())
    }

    pub fn has_final(&self) -> bool {
        self.base.join(MANIFEST_FILE).is_file()
    }

    fn ensure_base(&self) -> Result<()> {
        fs::create_dir_all(&self.base).with_context(|| {
            format!("failed to create checkpoint directory {}", self.base.display())
        })
    }
}

fn parse_epoch_dir(name: &str) -> Option<usize> {
    name.strip_prefix(EPOCH_PREFIX)?.parse().ok()
}

fn write_snapshot<B, R>(
    dir: &Path,
    manifest: &Manifest,
    vocab: &CharVocab,
    model: &CharRnn<B>,
    optimizer: R,
) -> Result<()>
where
    B: Backend,
    R: Record<B>,
{
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();

    let model_path = dir.join(MODEL_STEM);
    Recorder::<B>::record(&recorder, model.clone().into_record(), model_path.clone())
        .with_context(|| format!("failed to write model weights {}", model_path.display()))?;

    let optimizer_path = dir.join(OPTIMIZER_STEM);
    Recorder::<B>::record(&recorder, optimizer, optimizer_path.clone()).with_context(|| {
        format!(
            "failed to write optimizer state {}",
            optimizer_path.display()
        )
    })?;

    vocab.save(&dir.join(VOCAB_FILE))?;

    let manifest_path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(&manifest_path, json)
        .with_context(|| format!("failed to write manifest {}", manifest_path.display()))?;

    Ok(())
}

fn corrupt(dir: &Path, reason: impl Into<String>) -> anyhow::Error {
    Error::CorruptCheckpoint {
        path: dir.to_path_buf(),
        reason: reason.into(),
    }
    .into()
}

/// Reads and validates the manifest of the snapshot in `dir`.
pub fn read_manifest(dir: &Path) -> Result<Manifest> {
    if !dir.is_dir() {
        return Err(Error::CheckpointNotFound(dir.to_path_buf()).into());
    }

    let path = dir.join(MANIFEST_FILE);
    let json = fs::read_to_string(&path)
        .map_err(|err| corrupt(dir, format!("cannot read {MANIFEST_FILE}: {err}")))?;
    let manifest: Manifest = serde_json::from_str(&json)
        .map_err(|err| corrupt(dir, format!("cannot parse {MANIFEST_FILE}: {err}")))?;

    if manifest.format_version != FORMAT_VERSION {
        return Err(corrupt(
            dir,
            format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                manifest.format_version
            ),
        ));
    }
    manifest
        .model
        .validate()
        .map_err(|err| corrupt(dir, format!("invalid architecture: {err}")))?;

    Ok(manifest)
}

/// A model rebuilt from disk together with its vocabulary and manifest.
#[derive(Debug)]
pub struct Snapshot<B: Backend> {
    pub dir: PathBuf,
    pub manifest: Manifest,
    pub vocab: CharVocab,
    pub model: CharRnn<B>,
}

impl<B: Backend> Snapshot<B> {
    pub fn load(dir: &Path, device: &B::Device) -> Result<Self> {
        let manifest = read_manifest(dir)?;

        let vocab = CharVocab::load(&dir.join(VOCAB_FILE))
            .map_err(|err| corrupt(dir, format!("{err:#}")))?;
        if vocab.len() != manifest.model.vocab_size {
            return Err(corrupt(
                dir,
                format!(
                    "vocabulary has {} symbols but the model expects {}",
                    vocab.len(),
                    manifest.model.vocab_size
                ),
            ));
        }

        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let record = Recorder::<B>::load::<<CharRnn<B> as Module<B>>::Record>(
            &recorder,
            dir.join(MODEL_STEM),
            device,
        )
        .map_err(|err| corrupt(dir, format!("cannot load weights: {err}")))?;
        let model = CharRnn::<B>::new(&manifest.model, device).load_record(record);

        info!(
            "loaded snapshot from {} (epoch {})",
            dir.display(),
            manifest.epoch
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            vocab,
            model,
        })
    }
}

/// Restores optimizer state saved next to the weights in `dir`.
pub fn load_optimizer<B, O>(dir: &Path, optimizer: O, device: &B::Device) -> Result<O>
where
    B: AutodiffBackend,
    O: Optimizer<CharRnn<B>, B>,
{
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let record = Recorder::<B>::load::<O::Record>(&recorder, dir.join(OPTIMIZER_STEM), device)
        .map_err(|err| corrupt(dir, format!("cannot load optimizer state: {err}")))?;
    Ok(optimizer.load_record(record))
}
