#![recursion_limit = "512"]

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod generation;
pub mod logging;
pub mod model;
pub mod tokenizer;
pub mod trainer;

pub use checkpoint::{CheckpointSink, Manifest, Snapshot, load_optimizer, read_manifest};
pub use config::{
    CheckpointConfig, GenerationConfig, GenerationMode, ModelOverrides, OptimizerConfig,
    TrainingConfig, TrainingHyperparameters, build_model_spec, load_training_config,
};
pub use dataset::{CorpusConfig, CorpusFormat, Split, WindowBatch, WindowDataset, normalize};
pub use error::Error;
pub use generation::{
    ContextWindow, Generator, ModelPredictor, NextSymbol, WordSettings, rescale_with_temperature,
    sample_index,
};
pub use logging::init_logging;
pub use model::{CharRnn, ModelSpec, correct_predictions, next_symbol_loss};
pub use tokenizer::{CharVocab, SENTINEL_INDEX};
pub use trainer::{EarlyStopping, EpochSummary, StopReason, Trainer, TrainingReport};
