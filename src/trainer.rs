use std::path::PathBuf;

use anyhow::{Result, anyhow};
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::checkpoint::{CheckpointSink, Manifest, Snapshot, load_optimizer};
use crate::config::TrainingHyperparameters;
use crate::dataset::{Split, WindowDataset};
use crate::error::Error;
use crate::model::{CharRnn, ModelSpec, correct_predictions, next_symbol_loss};
use crate::tokenizer::CharVocab;

type RnnOptimizer<B> = OptimizerAdaptor<Adam, CharRnn<B>, B>;

/// Patience-based stopping on a monitored loss.
///
/// Stored in every manifest so a resumed run keeps counting from where the
/// interrupted one stopped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: usize,
    pub min_delta: f64,
    pub best_loss: Option<f64>,
    pub best_epoch: Option<usize>,
    pub stale_epochs: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            best_loss: None,
            best_epoch: None,
            stale_epochs: 0,
        }
    }

    /// Keeps the recorded progress but applies the given limits.
    pub fn with_limits(mut self, patience: usize, min_delta: f64) -> Self {
        self.patience = patience;
        self.min_delta = min_delta;
        self
    }

    /// Records the loss monitored after `epoch`. Returns `true` once
    /// `patience` consecutive epochs failed to improve on the best loss by
    /// more than `min_delta`.
    pub fn observe(&mut self, epoch: usize, loss: f64) -> bool {
        let improved =
            loss.is_finite() && self.best_loss.is_none_or(|best| loss < best - self.min_delta);

        if improved {
            self.best_loss = Some(loss);
            self.best_epoch = Some(epoch);
            self.stale_epochs = 0;
            return false;
        }

        self.stale_epochs += 1;
        self.stale_epochs >= self.patience
    }
}

/// Mean loss and argmax accuracy of one epoch. Validation figures are
/// absent when the dataset has no validation split.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: Option<f64>,
    pub valid_accuracy: Option<f64>,
}

/// Example-weighted loss and accuracy over one pass.
#[derive(Clone, Copy, Debug, Default)]
struct PassMetrics {
    loss_sum: f64,
    correct: usize,
    seen: usize,
}

impl PassMetrics {
    fn record(&mut self, batch_loss: f64, correct: usize, batch_len: usize) {
        self.loss_sum += batch_loss * batch_len as f64;
        self.correct += correct;
        self.seen += batch_len;
    }

    fn loss(&self) -> f64 {
        self.loss_sum / self.seen.max(1) as f64
    }

    fn accuracy(&self) -> f64 {
        self.correct as f64 / self.seen.max(1) as f64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Ran every configured epoch.
    EpochBudget,
    EarlyStopped { epoch: usize },
    /// The resumed checkpoint had already reached the configured epoch count.
    AlreadyComplete,
}

#[derive(Clone, Debug)]
pub struct TrainingReport {
    /// Epochs already completed before this run started.
    pub start_epoch: usize,
    pub epochs: Vec<EpochSummary>,
    pub stop_reason: StopReason,
    pub early_stopping: EarlyStopping,
    pub final_dir: PathBuf,
}

impl TrainingReport {
    pub fn last_epoch(&self) -> usize {
        self.epochs
            .last()
            .map(|summary| summary.epoch)
            .unwrap_or(self.start_epoch)
    }
}

/// Epoch-based minibatch training with per-epoch checkpoints.
pub struct Trainer<B: AutodiffBackend> {
    spec: ModelSpec,
    hyper: TrainingHyperparameters,
    learning_rate: f64,
    sink: CheckpointSink,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(
        spec: ModelSpec,
        hyper: TrainingHyperparameters,
        learning_rate: f64,
        sink: CheckpointSink,
        device: B::Device,
    ) -> Self {
        Self {
            spec,
            hyper,
            learning_rate,
            sink,
            device,
        }
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn sink(&self) -> &CheckpointSink {
        &self.sink
    }

    /// Trains on `dataset` until the epoch budget runs out or early stopping
    /// fires. With `resume = Some(n)` the weights, optimizer state and
    /// stopping progress are restored from epoch `n` and training continues
    /// at epoch `n + 1`.
    pub fn fit(
        &self,
        vocab: &CharVocab,
        dataset: &WindowDataset,
        resume: Option<usize>,
    ) -> Result<(CharRnn<B>, TrainingReport)> {
        self.check_inputs(vocab, dataset)?;

        let mut optim = AdamConfig::new().init::<B, CharRnn<B>>();
        let (mut model, mut stopping, start_epoch) = match resume {
            Some(epoch) => {
                let (model, stopping) = self.restore(epoch, vocab)?;
                optim = load_optimizer(&self.sink.epoch_dir(epoch), optim, &self.device)?;
                B::seed(self.hyper.seed.wrapping_add(epoch as u64));
                info!("resuming after epoch {epoch}");
                (model, stopping, epoch)
            }
            None => {
                B::seed(self.hyper.seed);
                let model = CharRnn::<B>::new(&self.spec, &self.device);
                let stopping = EarlyStopping::new(self.hyper.patience, self.hyper.min_delta);
                (model, stopping, 0)
            }
        };

        info!("model summary\n{}", self.spec.summary());
        info!(
            "training on {} examples, validating on {}",
            dataset.split_len(Split::Train),
            dataset.split_len(Split::Valid)
        );

        let mut epochs = Vec::new();
        let mut stop_reason = if start_epoch >= self.hyper.epochs {
            info!(
                "checkpoint already covers {start_epoch} of {} epochs",
                self.hyper.epochs
            );
            StopReason::AlreadyComplete
        } else {
            StopReason::EpochBudget
        };

        for epoch in (start_epoch + 1)..=self.hyper.epochs {
            let train;
            (model, optim, train) = self.train_epoch(model, optim, dataset, epoch);
            let valid = self.evaluate(&model, dataset);

            let summary = EpochSummary {
                epoch,
                train_loss: train.loss(),
                train_accuracy: train.accuracy(),
                valid_loss: valid.map(|pass| pass.loss()),
                valid_accuracy: valid.map(|pass| pass.accuracy()),
            };
            let should_stop =
                stopping.observe(epoch, summary.valid_loss.unwrap_or(summary.train_loss));
            match (summary.valid_loss, summary.valid_accuracy) {
                (Some(valid_loss), Some(valid_accuracy)) => info!(
                    "epoch {epoch}/{} | loss {:.4} | acc {:.4} | val_loss {valid_loss:.4} | val_acc {valid_accuracy:.4}",
                    self.hyper.epochs, summary.train_loss, summary.train_accuracy
                ),
                _ => info!(
                    "epoch {epoch}/{} | loss {:.4} | acc {:.4}",
                    self.hyper.epochs, summary.train_loss, summary.train_accuracy
                ),
            }

            let manifest = Manifest::new(
                epoch,
                self.spec.clone(),
                stopping.clone(),
                Some(summary.clone()),
            );
            self.sink
                .save_epoch(&manifest, vocab, &model, optim.to_record())?;

            epochs.push(summary);

            if should_stop {
                info!(
                    "early stopping after epoch {epoch}; best epoch {:?}",
                    stopping.best_epoch
                );
                stop_reason = StopReason::EarlyStopped { epoch };
                break;
            }
        }

        let last = epochs.last();
        let manifest = Manifest::new(
            last.map(|summary| summary.epoch).unwrap_or(start_epoch),
            self.spec.clone(),
            stopping.clone(),
            last.cloned(),
        );
        let final_dir = self
            .sink
            .save_final(&manifest, vocab, &model, optim.to_record())?;

        let report = TrainingReport {
            start_epoch,
            epochs,
            stop_reason,
            early_stopping: stopping,
            final_dir,
        };
        Ok((model, report))
    }

    fn check_inputs(&self, vocab: &CharVocab, dataset: &WindowDataset) -> Result<()> {
        self.spec.validate()?;
        if self.hyper.batch_size == 0 {
            return Err(Error::InvalidBatchSize.into());
        }
        if self.spec.vocab_size != vocab.len() {
            return Err(anyhow!(
                "model expects {} symbols but the vocabulary has {}",
                self.spec.vocab_size,
                vocab.len()
            ));
        }
        if self.spec.window != dataset.window() {
            return Err(anyhow!(
                "model window {} differs from dataset window {}",
                self.spec.window,
                dataset.window()
            ));
        }
        Ok(())
    }

    fn restore(&self, epoch: usize, vocab: &CharVocab) -> Result<(CharRnn<B>, EarlyStopping)> {
        let dir = self.sink.epoch_dir(epoch);
        let snapshot = Snapshot::<B>::load(&dir, &self.device)?;

        let mismatch = |reason: String| -> anyhow::Error {
            Error::CheckpointMismatch {
                path: dir.clone(),
                reason,
            }
            .into()
        };
        if snapshot.manifest.epoch != epoch {
            return Err(Error::CorruptCheckpoint {
                path: dir.clone(),
                reason: format!("manifest records epoch {}", snapshot.manifest.epoch),
            }
            .into());
        }
        if snapshot.manifest.model != self.spec {
            return Err(mismatch(format!(
                "stored architecture {:?} differs from configured {:?}",
                snapshot.manifest.model, self.spec
            )));
        }
        if snapshot.vocab != *vocab {
            return Err(mismatch(format!(
                "stored vocabulary has {} symbols, corpus produced {} with a different order",
                snapshot.vocab.len(),
                vocab.len()
            )));
        }

        let stopping = snapshot
            .manifest
            .early_stopping
            .with_limits(self.hyper.patience, self.hyper.min_delta);
        Ok((snapshot.model, stopping))
    }

    fn train_epoch(
        &self,
        mut model: CharRnn<B>,
        mut optim: RnnOptimizer<B>,
        dataset: &WindowDataset,
        epoch: usize,
    ) -> (CharRnn<B>, RnnOptimizer<B>, PassMetrics) {
        let mut rng = StdRng::seed_from_u64(self.hyper.seed.wrapping_add(epoch as u64));
        let order = dataset.shuffled_indices(Split::Train, &mut rng);

        let mut metrics = PassMetrics::default();
        for (step, chunk) in order.chunks(self.hyper.batch_size).enumerate() {
            let batch = dataset.batch::<B>(chunk, &self.device);
            let logits = model.forward(batch.contexts);
            let correct = correct_predictions(logits.clone(), batch.targets.clone());
            let loss = next_symbol_loss(logits, batch.targets);

            let value = loss.clone().into_scalar().elem::<f64>();
            metrics.record(value, correct, chunk.len());
            debug!("epoch {epoch} step {step} loss {value:.4}");

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(self.learning_rate, model, grads);
        }

        (model, optim, metrics)
    }

    fn evaluate(&self, model: &CharRnn<B>, dataset: &WindowDataset) -> Option<PassMetrics> {
        let indices = dataset.indices(Split::Valid);
        if indices.is_empty() {
            return None;
        }

        let model = model.valid();
        let mut metrics = PassMetrics::default();
        for chunk in indices.chunks(self.hyper.batch_size) {
            let batch = dataset.batch::<B::InnerBackend>(chunk, &self.device);
            let logits = model.forward(batch.contexts);
            let correct = correct_predictions(logits.clone(), batch.targets.clone());
            let loss = next_symbol_loss(logits, batch.targets);
            metrics.record(loss.into_scalar().elem::<f64>(), correct, chunk.len());
        }

        Some(metrics)
    }
}
