use burn::module::Module;
use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, activation};

use super::config::ModelSpec;
use super::lstm::LstmLayer;

/// Embedding, stacked LSTM layers and a projection onto the vocabulary.
#[derive(Module, Debug)]
pub struct CharRnn<B: Backend> {
    embedding: Embedding<B>,
    layers: Vec<LstmLayer<B>>,
    head: Linear<B>,
    vocab_size: usize,
    window: usize,
}

impl<B: Backend> CharRnn<B> {
    pub fn new(spec: &ModelSpec, device: &B::Device) -> Self {
        let embedding = EmbeddingConfig::new(spec.vocab_size, spec.embedding_dim).init(device);
        let layers = (0..spec.num_layers.max(1))
            .map(|layer| {
                LstmLayer::new(
                    spec.layer_input_dim(layer),
                    spec.hidden_dim,
                    spec.dropout,
                    spec.recurrent_dropout,
                    device,
                )
            })
            .collect();
        let head = LinearConfig::new(spec.hidden_dim, spec.vocab_size).init(device);

        Self {
            embedding,
            layers,
            head,
            vocab_size: spec.vocab_size,
            window: spec.window,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Unnormalized next-symbol scores, `[batch, window]` to `[batch, vocab]`.
    pub fn forward(&self, contexts: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let mut sequence = self.embedding.forward(contexts);

        let (last, stacked) = self
            .layers
            .split_last()
            .expect("model has at least one recurrent layer");
        for layer in stacked {
            sequence = layer.forward_sequence(sequence);
        }

        self.head.forward(last.forward_last(sequence))
    }

    /// Next-symbol distribution; every row sums to one.
    pub fn probabilities(&self, contexts: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        activation::softmax(self.forward(contexts), 1)
    }
}
