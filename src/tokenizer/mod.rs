pub mod char_vocab;

pub use char_vocab::{CharVocab, SENTINEL_INDEX};
