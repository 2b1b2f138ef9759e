use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::error::Error;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CorpusConfig {
    pub path: PathBuf,
    #[serde(flatten)]
    pub format: CorpusFormat,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum CorpusFormat {
    /// Running prose: lower-cased, newlines folded into spaces.
    Text(TextFormat),
    /// One word per line; out-of-range words are dropped and the rest joined
    /// with single spaces.
    WordList(WordListFormat),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct TextFormat {
    #[serde(default)]
    pub max_chars: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WordListFormat {
    #[serde(default = "default_min_word_len")]
    pub min_word_len: usize,
    #[serde(default = "default_max_word_len")]
    pub max_word_len: usize,
}

impl Default for WordListFormat {
    fn default() -> Self {
        Self {
            min_word_len: default_min_word_len(),
            max_word_len: default_max_word_len(),
        }
    }
}

impl CorpusConfig {
    /// Reads the whole corpus file and normalizes it.
    pub fn load(&self) -> Result<String> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read corpus {}", self.path.display()))?;
        let text = normalize(&raw, &self.format)?;
        info!(
            "loaded {} symbols from {}",
            text.chars().count(),
            self.path.display()
        );
        Ok(text)
    }
}

pub fn normalize(raw: &str, format: &CorpusFormat) -> Result<String> {
    let text = match format {
        CorpusFormat::Text(config) => {
            let folded = raw.to_lowercase().replace('\n', " ");
            match config.max_chars {
                Some(limit) => folded.chars().take(limit).collect(),
                None => folded,
            }
        }
        CorpusFormat::WordList(config) => raw
            .lines()
            .filter(|word| {
                let len = word.chars().count();
                len >= config.min_word_len && len <= config.max_word_len
            })
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase(),
    };

    if text.is_empty() {
        return Err(Error::EmptyCorpus.into());
    }

    Ok(text)
}

fn default_min_word_len() -> usize {
    3
}

fn default_max_word_len() -> usize {
    12
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn text_is_lowercased_and_newlines_folded() {
        let format = CorpusFormat::Text(TextFormat { max_chars: None });
        let text = normalize("First Citizen:\nBefore we proceed", &format).expect("normalize");
        assert_eq!(text, "first citizen: before we proceed");
    }

    #[test]
    fn text_is_truncated_to_max_chars() {
        let format = CorpusFormat::Text(TextFormat {
            max_chars: Some(5),
        });
        assert_eq!(normalize("Hello\nWorld", &format).expect("normalize"), "hello");
    }

    #[test]
    fn word_list_keeps_words_within_bounds() {
        let format = CorpusFormat::WordList(WordListFormat::default());
        let raw = "an\nApple\nbanana\nextraordinarily\nfig\r\nkiwi";
        let text = normalize(raw, &format).expect("normalize");
        assert_eq!(text, "apple banana fig kiwi");
    }

    #[test]
    fn empty_result_is_rejected() {
        let format = CorpusFormat::WordList(WordListFormat::default());
        let err = normalize("a\nb\n", &format).unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::EmptyCorpus));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("corpus.txt");
        fs::write(&path, "ABC\nabc").expect("write corpus");

        let config = CorpusConfig {
            path,
            format: CorpusFormat::Text(TextFormat::default()),
        };
        assert_eq!(config.load().expect("load"), "abc abc");
    }

    #[test]
    fn missing_corpus_names_the_path() {
        let config = CorpusConfig {
            path: PathBuf::from("no/such/corpus.txt"),
            format: CorpusFormat::Text(TextFormat::default()),
        };
        let err = config.load().unwrap_err();
        assert!(format!("{err:#}").contains("no/such/corpus.txt"));
    }
}
