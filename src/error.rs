use std::path::PathBuf;

use thiserror::Error;

/// Failures the pipeline distinguishes from plain I/O.
///
/// Library functions return `anyhow::Result`; callers that need to branch on
/// the kind of failure use `err.downcast_ref::<Error>()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("corpus is empty after normalization")]
    EmptyCorpus,

    #[error("window length must be positive")]
    InvalidWindow,

    #[error("window length {window} leaves no examples in a corpus of {corpus_len} symbols")]
    WindowTooLong { window: usize, corpus_len: usize },

    #[error("validation split {0} must lie in [0, 1) and leave both splits non-empty")]
    InvalidValidationSplit(f32),

    #[error("batch size must be positive")]
    InvalidBatchSize,

    #[error("temperature must be finite and strictly positive, got {0}")]
    InvalidTemperature(f32),

    #[error("probability distribution is degenerate after temperature scaling")]
    DegenerateDistribution,

    #[error("symbol {0:?} is not part of the vocabulary")]
    UnknownSymbol(char),

    #[error("no checkpoint at {}", .0.display())]
    CheckpointNotFound(PathBuf),

    #[error("checkpoint at {} is unreadable: {reason}", .path.display())]
    CorruptCheckpoint { path: PathBuf, reason: String },

    #[error("checkpoint at {} does not match the current configuration: {reason}", .path.display())]
    CheckpointMismatch { path: PathBuf, reason: String },
}
