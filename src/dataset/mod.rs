pub mod corpus;
pub mod window;

pub use corpus::{CorpusConfig, CorpusFormat, TextFormat, WordListFormat, normalize};
pub use window::{Split, WindowBatch, WindowDataset};
