use burn::LearningRate;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend as BackendTrait;
use burn::tensor::{Int, Tensor, TensorData};
use burn_autodiff::Autodiff;
use burn_char_rnn::{CharRnn, ModelSpec, next_symbol_loss};
use burn_ndarray::NdArray;
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

fn training_step_bench(c: &mut Criterion) {
    type Backend = Autodiff<NdArray<f32>>;
    <Backend as BackendTrait>::seed(24);
    let device = <Backend as BackendTrait>::Device::default();

    let vocab_size = 40;
    let window = 100;
    let batch_size = 32;
    let base_model = CharRnn::<Backend>::new(&ModelSpec::new(vocab_size, window), &device);

    let context_tokens: Vec<i64> = (0..(batch_size * window))
        .map(|idx| (idx % vocab_size) as i64)
        .collect();
    let target_tokens: Vec<i64> = (0..batch_size)
        .map(|row| ((row * window + window) % vocab_size) as i64)
        .collect();

    let contexts = Tensor::<Backend, 2, Int>::from_data(
        TensorData::new(context_tokens, [batch_size, window]),
        &device,
    );
    let targets =
        Tensor::<Backend, 1, Int>::from_data(TensorData::new(target_tokens, [batch_size]), &device);

    let optimizer_config = AdamConfig::new();
    let lr: LearningRate = 1e-3;

    c.bench_function("char_rnn_single_train_step", |b| {
        b.iter_batched(
            || {
                let model = base_model.clone();
                let optimizer = optimizer_config.clone().init::<Backend, CharRnn<Backend>>();
                (model, optimizer)
            },
            |(model, mut optimizer)| {
                let logits = model.forward(contexts.clone());
                let loss = next_symbol_loss::<Backend>(logits, targets.clone());
                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                optimizer.step(lr, model, grads)
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, training_step_bench);
criterion_main!(benches);
