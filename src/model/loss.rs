use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor};

/// Cross-entropy between next-symbol logits `[batch, vocab]` and integer
/// targets `[batch]`.
pub fn next_symbol_loss<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let device = logits.device();
    CrossEntropyLossConfig::new()
        .init::<B>(&device)
        .forward(logits, targets)
}

/// Number of rows whose argmax matches the target symbol.
pub fn correct_predictions<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> usize {
    let [batch, _] = logits.dims();
    let hits = logits
        .argmax(1)
        .reshape([batch])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();
    hits.max(0) as usize
}
