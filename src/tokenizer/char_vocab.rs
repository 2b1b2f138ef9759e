use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Index used for padding short seeds and for symbols missing from the
/// vocabulary during generation.
pub const SENTINEL_INDEX: usize = 0;

/// Bijection between the distinct characters of a corpus and `0..len()`.
///
/// Indices are assigned in first-seen order, so the same corpus always yields
/// the same vocabulary.
#[derive(Clone, Debug)]
pub struct CharVocab {
    symbols: Vec<char>,
    index: HashMap<char, usize>,
}

#[derive(Serialize, Deserialize)]
struct VocabFile {
    symbols: Vec<char>,
}

impl CharVocab {
    pub fn fit(text: &str) -> Result<Self> {
        let mut symbols = Vec::new();
        let mut index = HashMap::new();
        for ch in text.chars() {
            if !index.contains_key(&ch) {
                index.insert(ch, symbols.len());
                symbols.push(ch);
            }
        }

        if symbols.is_empty() {
            return Err(Error::EmptyCorpus.into());
        }

        Ok(Self { symbols, index })
    }

    pub fn from_symbols(symbols: Vec<char>) -> Result<Self> {
        if symbols.is_empty() {
            return Err(Error::EmptyCorpus.into());
        }

        let mut index = HashMap::with_capacity(symbols.len());
        for (idx, &ch) in symbols.iter().enumerate() {
            if index.insert(ch, idx).is_some() {
                return Err(anyhow!("duplicate symbol {ch:?} in vocabulary"));
            }
        }

        Ok(Self { symbols, index })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, ch: char) -> bool {
        self.index.contains_key(&ch)
    }

    pub fn index(&self, ch: char) -> Option<usize> {
        self.index.get(&ch).copied()
    }

    pub fn symbol(&self, idx: usize) -> Option<char> {
        self.symbols.get(idx).copied()
    }

    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }

    /// Encodes a corpus; every symbol must already be in the vocabulary.
    pub fn encode(&self, text: &str) -> Result<Vec<usize>> {
        text.chars()
            .map(|ch| self.index(ch).ok_or_else(|| Error::UnknownSymbol(ch).into()))
            .collect()
    }

    /// Encodes a seed, mapping unseen symbols to [`SENTINEL_INDEX`].
    pub fn encode_lossy(&self, text: &str) -> Vec<usize> {
        text.chars()
            .map(|ch| match self.index(ch) {
                Some(idx) => idx,
                None => {
                    tracing::debug!("seed symbol {ch:?} not in vocabulary, using sentinel");
                    SENTINEL_INDEX
                }
            })
            .collect()
    }

    pub fn decode(&self, ids: &[usize]) -> String {
        ids.iter().filter_map(|&id| self.symbol(id)).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = VocabFile {
            symbols: self.symbols.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write vocabulary {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read vocabulary {}", path.display()))?;
        let file: VocabFile = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse vocabulary {}", path.display()))?;
        Self::from_symbols(file.symbols)
    }
}

impl PartialEq for CharVocab {
    fn eq(&self, other: &Self) -> bool {
        self.symbols == other.symbols
    }
}

impl Eq for CharVocab {}
