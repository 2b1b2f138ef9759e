use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;

use crate::dataset::CorpusConfig;
use crate::generation::check_temperature;
use crate::model::ModelSpec;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrainingHyperparameters {
    pub window: usize,
    pub batch_size: usize,
    pub epochs: usize,
    #[serde(default = "default_validation_split")]
    pub validation_split: f32,
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default)]
    pub min_delta: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct ModelOverrides {
    pub embedding_dim: Option<usize>,
    pub hidden_dim: Option<usize>,
    pub num_layers: Option<usize>,
    pub dropout: Option<f64>,
    pub recurrent_dropout: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CheckpointConfig {
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    #[default]
    Chars,
    Words,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GenerationConfig {
    pub prompt: String,
    #[serde(default)]
    pub mode: GenerationMode,
    /// Symbols to emit in `chars` mode.
    #[serde(default = "default_length")]
    pub length: usize,
    /// Distinct words to collect in `words` mode.
    #[serde(default = "default_words")]
    pub words: usize,
    #[serde(default = "default_min_word_len")]
    pub min_word_len: usize,
    #[serde(default = "default_max_word_len")]
    pub max_word_len: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl GenerationConfig {
    /// Rejects sampling settings that would only fail once generation starts.
    pub fn validate(&self) -> Result<()> {
        check_temperature(self.temperature)?;
        if self.min_word_len > self.max_word_len {
            return Err(anyhow!(
                "min_word_len {} exceeds max_word_len {}",
                self.min_word_len,
                self.max_word_len
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrainingConfig {
    pub corpus: CorpusConfig,
    pub training: TrainingHyperparameters,
    pub optimizer: OptimizerConfig,
    pub checkpoint: CheckpointConfig,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub model: ModelOverrides,
}

pub fn load_training_config(paths: &[PathBuf]) -> Result<TrainingConfig> {
    if paths.is_empty() {
        return Err(anyhow!("at least one configuration path is required"));
    }

    let mut iter = paths.iter();
    let first_path = iter
        .next()
        .ok_or_else(|| anyhow!("configuration iterator unexpectedly empty"))?;
    let mut value = load_value(first_path)?;

    for path in iter {
        let overlay = load_value(path)?;
        merge_values(&mut value, overlay);
    }

    let config = value
        .try_into::<TrainingConfig>()
        .map_err(|err| anyhow!(err))?;
    config
        .generation
        .validate()
        .context("invalid [generation] settings")?;
    Ok(config)
}

/// Resolves the architecture for a vocabulary of `vocab_size` symbols.
pub fn build_model_spec(
    overrides: &ModelOverrides,
    vocab_size: usize,
    window: usize,
) -> ModelSpec {
    let mut spec = ModelSpec::new(vocab_size, window);

    if let Some(embedding_dim) = overrides.embedding_dim {
        spec.embedding_dim = embedding_dim;
    }
    if let Some(hidden_dim) = overrides.hidden_dim {
        spec.hidden_dim = hidden_dim;
    }
    if let Some(num_layers) = overrides.num_layers {
        spec.num_layers = num_layers;
    }
    if let Some(dropout) = overrides.dropout {
        spec.dropout = dropout;
    }
    if let Some(recurrent_dropout) = overrides.recurrent_dropout {
        spec.recurrent_dropout = recurrent_dropout;
    }

    spec
}

fn load_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    let table: toml::value::Table = toml::from_str(&content)
        .with_context(|| format!("failed to parse {} as TOML", path.display()))?;
    Ok(Value::Table(table))
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_table.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value;
        }
    }
}

fn default_validation_split() -> f32 {
    0.1
}

fn default_patience() -> usize {
    3
}

fn default_seed() -> u64 {
    1337
}

fn default_length() -> usize {
    300
}

fn default_words() -> usize {
    20
}

fn default_min_word_len() -> usize {
    3
}

fn default_max_word_len() -> usize {
    12
}

fn default_temperature() -> f32 {
    0.8
}
