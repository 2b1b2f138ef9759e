use std::fmt::Write as _;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Architecture of a [`CharRnn`](super::CharRnn).
///
/// Persisted next to the weights of every checkpoint so a snapshot can be
/// rebuilt without consulting the training configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub vocab_size: usize,
    pub window: usize,
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    pub num_layers: usize,
    pub dropout: f64,
    pub recurrent_dropout: f64,
}

impl ModelSpec {
    pub fn new(vocab_size: usize, window: usize) -> Self {
        Self {
            vocab_size,
            window,
            embedding_dim: 64,
            hidden_dim: 128,
            num_layers: 2,
            dropout: 0.1,
            recurrent_dropout: 0.1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(anyhow!("vocab_size must be positive"));
        }
        if self.window == 0 {
            return Err(anyhow!("window must be positive"));
        }
        if self.embedding_dim == 0 || self.hidden_dim == 0 {
            return Err(anyhow!("embedding_dim and hidden_dim must be positive"));
        }
        if self.num_layers == 0 {
            return Err(anyhow!("at least one recurrent layer is required"));
        }
        for (name, prob) in [
            ("dropout", self.dropout),
            ("recurrent_dropout", self.recurrent_dropout),
        ] {
            if !(0.0..1.0).contains(&prob) {
                return Err(anyhow!("{name} must lie in [0, 1), got {prob}"));
            }
        }
        Ok(())
    }

    pub(crate) fn layer_input_dim(&self, layer: usize) -> usize {
        if layer == 0 {
            self.embedding_dim
        } else {
            self.hidden_dim
        }
    }

    fn embedding_params(&self) -> usize {
        self.vocab_size * self.embedding_dim
    }

    fn lstm_params(&self, layer: usize) -> usize {
        let gates = 4 * self.hidden_dim;
        self.layer_input_dim(layer) * gates + gates + self.hidden_dim * gates
    }

    fn head_params(&self) -> usize {
        self.hidden_dim * self.vocab_size + self.vocab_size
    }

    pub fn parameter_count(&self) -> usize {
        self.embedding_params()
            + (0..self.num_layers)
                .map(|layer| self.lstm_params(layer))
                .sum::<usize>()
            + self.head_params()
    }

    /// Per-layer table of output shapes and parameter counts.
    pub fn summary(&self) -> String {
        let mut rows = vec![(
            "embedding (Embedding)".to_string(),
            format!("[batch, {}, {}]", self.window, self.embedding_dim),
            self.embedding_params(),
        )];
        for layer in 0..self.num_layers {
            let shape = if layer + 1 < self.num_layers {
                format!("[batch, {}, {}]", self.window, self.hidden_dim)
            } else {
                format!("[batch, {}]", self.hidden_dim)
            };
            rows.push((format!("lstm_{layer} (Lstm)"), shape, self.lstm_params(layer)));
        }
        rows.push((
            "head (Linear, softmax)".to_string(),
            format!("[batch, {}]", self.vocab_size),
            self.head_params(),
        ));

        let mut out = String::new();
        let rule = "-".repeat(64);
        let _ = writeln!(out, "{:<28}{:<24}{:>12}", "Layer (type)", "Output shape", "Params");
        let _ = writeln!(out, "{rule}");
        for (name, shape, params) in rows {
            let _ = writeln!(out, "{name:<28}{shape:<24}{params:>12}");
        }
        let _ = writeln!(out, "{rule}");
        let _ = write!(out, "Total params: {}", self.parameter_count());
        out
    }
}
