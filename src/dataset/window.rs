use std::ops::Range;

use anyhow::Result;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Valid,
}

/// Every `(context, target)` pair obtained by sliding a window of fixed length
/// one position at a time over an encoded corpus.
///
/// Example `i` has context `tokens[i..i + window]` and target
/// `tokens[i + window]`. The validation split is the unshuffled tail of the
/// example sequence, so the same corpus and fraction always produce the same
/// split.
#[derive(Clone, Debug)]
pub struct WindowDataset {
    tokens: Vec<usize>,
    window: usize,
    train_len: usize,
}

#[derive(Clone, Debug)]
pub struct WindowBatch<B: Backend> {
    pub contexts: Tensor<B, 2, Int>,
    pub targets: Tensor<B, 1, Int>,
}

impl WindowDataset {
    pub fn new(tokens: Vec<usize>, window: usize, validation_split: f32) -> Result<Self> {
        if window == 0 {
            return Err(Error::InvalidWindow.into());
        }
        if tokens.len() <= window {
            return Err(Error::WindowTooLong {
                window,
                corpus_len: tokens.len(),
            }
            .into());
        }
        if !(0.0..1.0).contains(&validation_split) {
            return Err(Error::InvalidValidationSplit(validation_split).into());
        }

        let examples = tokens.len() - window;
        let valid_len = (examples as f64 * validation_split as f64).floor() as usize;
        if validation_split > 0.0 && (valid_len == 0 || valid_len == examples) {
            return Err(Error::InvalidValidationSplit(validation_split).into());
        }

        Ok(Self {
            tokens,
            window,
            train_len: examples - valid_len,
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Total number of examples, `corpus_len - window`.
    pub fn len(&self) -> usize {
        self.tokens.len() - self.window
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn split_len(&self, split: Split) -> usize {
        self.split_range(split).len()
    }

    pub fn example(&self, idx: usize) -> (&[usize], usize) {
        (
            &self.tokens[idx..idx + self.window],
            self.tokens[idx + self.window],
        )
    }

    pub fn examples(&self) -> impl Iterator<Item = (&[usize], usize)> + '_ {
        (0..self.len()).map(|idx| self.example(idx))
    }

    pub fn indices(&self, split: Split) -> Vec<usize> {
        self.split_range(split).collect()
    }

    pub fn shuffled_indices<R: Rng>(&self, split: Split, rng: &mut R) -> Vec<usize> {
        let mut indices = self.indices(split);
        indices.shuffle(rng);
        indices
    }

    pub fn batch<B: Backend>(&self, indices: &[usize], device: &B::Device) -> WindowBatch<B> {
        let mut contexts = Vec::with_capacity(indices.len() * self.window);
        let mut targets = Vec::with_capacity(indices.len());
        for &idx in indices {
            let (context, target) = self.example(idx);
            contexts.extend(context.iter().map(|&tok| tok as i64));
            targets.push(target as i64);
        }

        WindowBatch {
            contexts: Tensor::<B, 2, Int>::from_data(
                TensorData::new(contexts, [indices.len(), self.window]),
                device,
            ),
            targets: Tensor::<B, 1, Int>::from_data(
                TensorData::new(targets, [indices.len()]),
                device,
            ),
        }
    }

    fn split_range(&self, split: Split) -> Range<usize> {
        match split {
            Split::Train => 0..self.train_len,
            Split::Valid => self.train_len..self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn abc_tokens(repeats: usize) -> Vec<usize> {
        (0..repeats * 3).map(|idx| idx % 3).collect()
    }

    #[test]
    fn produces_corpus_len_minus_window_examples() {
        let tokens: Vec<usize> = (0..50).map(|idx| idx % 7).collect();
        for window in [1, 5, 20, 49] {
            let dataset = WindowDataset::new(tokens.clone(), window, 0.0).expect("dataset");
            assert_eq!(dataset.len(), tokens.len() - window);

            for (i, (context, target)) in dataset.examples().enumerate() {
                assert_eq!(context.len(), window);
                for (k, &tok) in context.iter().enumerate() {
                    assert_eq!(tok, tokens[i + k]);
                }
                assert_eq!(target, tokens[i + window]);
            }
        }
    }

    #[test]
    fn abc_corpus_frames_repeating_pairs() {
        let dataset = WindowDataset::new(abc_tokens(4), 3, 0.0).expect("dataset");
        let pairs: Vec<(Vec<usize>, usize)> = dataset
            .examples()
            .map(|(context, target)| (context.to_vec(), target))
            .collect();

        assert_eq!(pairs.len(), 9);
        assert_eq!(pairs[0], (vec![0, 1, 2], 0));
        assert_eq!(pairs[1], (vec![1, 2, 0], 1));
        assert_eq!(pairs[2], (vec![2, 0, 1], 2));
        assert_eq!(pairs[3], (vec![0, 1, 2], 0));
    }

    #[test]
    fn window_not_shorter_than_corpus_is_fatal() {
        let err = WindowDataset::new(vec![0, 1, 2], 3, 0.0).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::WindowTooLong {
                window: 3,
                corpus_len: 3
            })
        );
        assert!(WindowDataset::new(vec![0, 1, 2], 0, 0.0).is_err());
    }

    #[test]
    fn validation_split_is_the_unshuffled_tail() {
        let dataset = WindowDataset::new(abc_tokens(34), 2, 0.1).expect("dataset");
        assert_eq!(dataset.len(), 100);
        assert_eq!(dataset.split_len(Split::Train), 90);
        assert_eq!(dataset.indices(Split::Valid), (90..100).collect::<Vec<_>>());
    }

    #[test]
    fn split_leaving_an_empty_side_is_rejected() {
        assert!(WindowDataset::new(abc_tokens(2), 3, 0.1).is_err());
        assert!(WindowDataset::new(abc_tokens(10), 3, 1.0).is_err());
    }

    #[test]
    fn shuffling_only_permutes_the_training_split() {
        let dataset = WindowDataset::new(abc_tokens(34), 2, 0.1).expect("dataset");
        let mut rng = StdRng::seed_from_u64(7);
        let mut shuffled = dataset.shuffled_indices(Split::Train, &mut rng);
        shuffled.sort_unstable();
        assert_eq!(shuffled, dataset.indices(Split::Train));

        let again = dataset.shuffled_indices(Split::Train, &mut StdRng::seed_from_u64(7));
        let first = dataset.shuffled_indices(Split::Train, &mut StdRng::seed_from_u64(7));
        assert_eq!(again, first);
    }
}
