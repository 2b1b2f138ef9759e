use std::collections::{HashSet, VecDeque};
use std::io::Write;

use anyhow::{Result, anyhow};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use crate::checkpoint::Snapshot;
use crate::error::Error;
use crate::model::CharRnn;
use crate::tokenizer::{CharVocab, SENTINEL_INDEX};

/// Upper bound on sampling steps per requested word in word mode.
pub const WORD_STEP_MULTIPLIER: usize = 15;

/// Source of next-symbol distributions for a fixed-length context.
pub trait NextSymbol {
    /// Probabilities over the vocabulary for the symbol following `context`.
    fn next_symbol_probabilities(&self, context: &[usize]) -> Result<Vec<f32>>;
}

pub struct ModelPredictor<B: Backend> {
    model: CharRnn<B>,
    device: B::Device,
}

impl<B: Backend> ModelPredictor<B> {
    pub fn new(model: CharRnn<B>, device: B::Device) -> Self {
        Self { model, device }
    }
}

impl<B: Backend> NextSymbol for ModelPredictor<B> {
    fn next_symbol_probabilities(&self, context: &[usize]) -> Result<Vec<f32>> {
        let tokens: Vec<i64> = context.iter().map(|&idx| idx as i64).collect();
        let input = Tensor::<B, 2, Int>::from_data(
            TensorData::new(tokens, [1, context.len()]),
            &self.device,
        );

        self.model
            .probabilities(input)
            .into_data()
            .convert::<f32>()
            .into_vec::<f32>()
            .map_err(|err| anyhow!("{err:?}"))
    }
}

pub(crate) fn check_temperature(temperature: f32) -> Result<()> {
    if temperature.is_finite() && temperature > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidTemperature(temperature).into())
    }
}

/// Sharpens (`temperature < 1`) or flattens (`temperature > 1`) a
/// distribution: `p_i^(1/T)` renormalized, computed in log space.
///
/// Zero-probability entries stay at zero. A distribution with no positive
/// finite entry, or one containing NaN, is rejected.
pub fn rescale_with_temperature(probabilities: &[f32], temperature: f32) -> Result<Vec<f64>> {
    check_temperature(temperature)?;
    if probabilities.iter().any(|p| p.is_nan() || *p < 0.0) {
        return Err(Error::DegenerateDistribution.into());
    }

    let temperature = temperature as f64;
    let scaled: Vec<f64> = probabilities
        .iter()
        .map(|&p| (p as f64).ln() / temperature)
        .collect();
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Err(Error::DegenerateDistribution.into());
    }

    let exps: Vec<f64> = scaled.iter().map(|value| (value - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Err(Error::DegenerateDistribution.into());
    }

    Ok(exps.into_iter().map(|value| value / sum).collect())
}

/// Draws one index with probability proportional to its weight.
pub fn sample_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Result<usize> {
    let dist = WeightedIndex::new(weights).map_err(|_| Error::DegenerateDistribution)?;
    Ok(dist.sample(rng))
}

/// The most recent `window` symbol indices fed to the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextWindow {
    indices: VecDeque<usize>,
    window: usize,
}

impl ContextWindow {
    /// Lowercases and encodes `seed`, keeps its last `window` symbols and
    /// left-pads shorter seeds with the sentinel index. Characters outside
    /// the vocabulary map to the sentinel.
    pub fn from_seed(vocab: &CharVocab, seed: &str, window: usize) -> Self {
        let encoded = vocab.encode_lossy(&seed.to_lowercase());
        let tail = &encoded[encoded.len().saturating_sub(window)..];

        let mut indices = VecDeque::with_capacity(window);
        indices.extend(std::iter::repeat_n(SENTINEL_INDEX, window - tail.len()));
        indices.extend(tail.iter().copied());

        Self { indices, window }
    }

    pub fn push(&mut self, idx: usize) {
        if self.window == 0 {
            return;
        }
        if self.indices.len() == self.window {
            self.indices.pop_front();
        }
        self.indices.push_back(idx);
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.indices.iter().copied().collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WordSettings {
    pub words: usize,
    pub min_len: usize,
    pub max_len: usize,
}

/// Autoregressive sampler over a [`NextSymbol`] source.
pub struct Generator<P: NextSymbol> {
    predictor: P,
    vocab: CharVocab,
    window: usize,
}

impl<B: Backend> Generator<ModelPredictor<B>> {
    pub fn from_snapshot(snapshot: Snapshot<B>, device: B::Device) -> Self {
        let window = snapshot.manifest.model.window;
        Self::new(
            ModelPredictor::new(snapshot.model, device),
            snapshot.vocab,
            window,
        )
    }
}

impl<P: NextSymbol> Generator<P> {
    pub fn new(predictor: P, vocab: CharVocab, window: usize) -> Self {
        Self {
            predictor,
            vocab,
            window,
        }
    }

    pub fn vocab(&self) -> &CharVocab {
        &self.vocab
    }

    pub fn window(&self) -> usize {
        self.window
    }

    fn step<R: Rng + ?Sized>(
        &self,
        context: &mut ContextWindow,
        temperature: f32,
        rng: &mut R,
    ) -> Result<char> {
        let probabilities = self
            .predictor
            .next_symbol_probabilities(&context.to_vec())?;
        if probabilities.len() != self.vocab.len() {
            return Err(anyhow!(
                "predictor returned {} probabilities for a vocabulary of {}",
                probabilities.len(),
                self.vocab.len()
            ));
        }

        let weights = rescale_with_temperature(&probabilities, temperature)?;
        let idx = sample_index(&weights, rng)?;
        let symbol = self
            .vocab
            .symbol(idx)
            .ok_or_else(|| anyhow!("sampled index {idx} is outside the vocabulary"))?;

        context.push(idx);
        Ok(symbol)
    }

    /// Samples `length` symbols after `seed`, writing each one to `out` as it
    /// is produced. Returns the seed followed by the generated text.
    pub fn generate_chars<R, W>(
        &self,
        seed: &str,
        length: usize,
        temperature: f32,
        rng: &mut R,
        out: &mut W,
    ) -> Result<String>
    where
        R: Rng + ?Sized,
        W: Write + ?Sized,
    {
        check_temperature(temperature)?;

        let mut context = ContextWindow::from_seed(&self.vocab, seed, self.window);
        let mut text = String::from(seed);
        for _ in 0..length {
            let symbol = self.step(&mut context, temperature, rng)?;
            write!(out, "{symbol}")?;
            out.flush()?;
            text.push(symbol);
        }

        Ok(text)
    }

    /// Samples until `settings.words` distinct words with a length in
    /// `[min_len, max_len]` have been completed, or the step budget of
    /// `words * WORD_STEP_MULTIPLIER` is spent. Words are delimited by the
    /// space symbol; a trailing partial word in `seed` is continued.
    pub fn generate_words<R: Rng + ?Sized>(
        &self,
        seed: &str,
        settings: WordSettings,
        temperature: f32,
        rng: &mut R,
    ) -> Result<Vec<String>> {
        check_temperature(temperature)?;

        let mut context = ContextWindow::from_seed(&self.vocab, seed, self.window);
        let mut current = seed
            .to_lowercase()
            .rsplit(' ')
            .next()
            .map(str::to_string)
            .unwrap_or_default();
        let mut seen = HashSet::new();
        let mut words = Vec::with_capacity(settings.words);

        let budget = settings.words.saturating_mul(WORD_STEP_MULTIPLIER);
        for _ in 0..budget {
            if words.len() >= settings.words {
                break;
            }

            let symbol = self.step(&mut context, temperature, rng)?;
            if symbol != ' ' {
                current.push(symbol);
                continue;
            }

            let len = current.chars().count();
            if (settings.min_len..=settings.max_len).contains(&len) && seen.insert(current.clone())
            {
                words.push(current.clone());
            }
            current.clear();
        }

        Ok(words)
    }
}
