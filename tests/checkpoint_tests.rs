use std::fs;

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend as BackendTrait;
use burn::tensor::{Int, Tensor, TensorData};
use burn_autodiff::Autodiff;
use burn_char_rnn::checkpoint::{MANIFEST_FILE, VOCAB_FILE};
use burn_char_rnn::{
    CharRnn, CharVocab, CheckpointSink, EarlyStopping, EpochSummary, Error, Manifest, ModelSpec,
    Snapshot, load_optimizer, next_symbol_loss,
};
use burn_ndarray::NdArray;
use tempfile::tempdir;

type TrainBackend = Autodiff<NdArray<f32>>;
type InferBackend = NdArray<f32>;

fn spec() -> ModelSpec {
    ModelSpec {
        vocab_size: 4,
        window: 3,
        embedding_dim: 6,
        hidden_dim: 10,
        num_layers: 2,
        dropout: 0.0,
        recurrent_dropout: 0.0,
    }
}

fn trained(epoch: usize, train_loss: f64) -> Option<EpochSummary> {
    Some(EpochSummary {
        epoch,
        train_loss,
        train_accuracy: 0.5,
        valid_loss: None,
        valid_accuracy: None,
    })
}

fn contexts<B: BackendTrait>(device: &B::Device) -> Tensor<B, 2, Int> {
    Tensor::from_data(TensorData::new(vec![0i64, 1, 2, 3, 2, 1], [2, 3]), device)
}

fn probabilities<B: BackendTrait>(model: &CharRnn<B>, device: &B::Device) -> Vec<f32> {
    model
        .probabilities(contexts::<B>(device))
        .into_data()
        .convert::<f32>()
        .into_vec::<f32>()
        .expect("probabilities")
}

#[test]
fn snapshot_round_trip_preserves_predictions() {
    let dir = tempdir().expect("tempdir");
    let device = Default::default();
    let vocab = CharVocab::fit("abcd").expect("vocab");

    let model = CharRnn::<TrainBackend>::new(&spec(), &device);
    let mut optim = AdamConfig::new().init::<TrainBackend, CharRnn<TrainBackend>>();
    let targets = Tensor::<TrainBackend, 1, Int>::from_data(TensorData::new(vec![3i64, 0], [2]), &device);
    let loss = next_symbol_loss(model.forward(contexts::<TrainBackend>(&device)), targets);
    let grads = GradientsParams::from_grads(loss.backward(), &model);
    let model = optim.step(1e-2, model, grads);

    let sink = CheckpointSink::new(dir.path().join("run"));
    let manifest = Manifest::new(1, spec(), EarlyStopping::new(3, 0.0), trained(1, 1.2));
    let saved = sink
        .save_epoch(&manifest, &vocab, &model, optim.to_record())
        .expect("save epoch");
    assert_eq!(saved, sink.epoch_dir(1));
    assert!(saved.join(MANIFEST_FILE).is_file());
    assert!(saved.join(VOCAB_FILE).is_file());
    assert_eq!(sink.epochs().expect("epochs"), vec![1]);

    let snapshot = Snapshot::<InferBackend>::load(&saved, &device).expect("load snapshot");
    assert_eq!(snapshot.manifest, manifest);
    assert_eq!(snapshot.vocab, vocab);

    let expected = probabilities(&model.valid(), &device);
    let restored = probabilities(&snapshot.model, &device);
    assert_eq!(expected.len(), restored.len());
    for (a, b) in expected.iter().zip(&restored) {
        assert!((a - b).abs() < 1e-6, "{a} vs {b}");
    }

    let fresh = AdamConfig::new().init::<TrainBackend, CharRnn<TrainBackend>>();
    load_optimizer(&saved, fresh, &device).expect("load optimizer");
}

#[test]
fn saving_an_epoch_twice_replaces_it() {
    let dir = tempdir().expect("tempdir");
    let device = Default::default();
    let vocab = CharVocab::fit("abcd").expect("vocab");
    let model = CharRnn::<TrainBackend>::new(&spec(), &device);
    let optim = AdamConfig::new().init::<TrainBackend, CharRnn<TrainBackend>>();
    let sink = CheckpointSink::new(dir.path());

    let first = Manifest::new(2, spec(), EarlyStopping::new(3, 0.0), trained(2, 2.0));
    sink.save_epoch(&first, &vocab, &model, optim.to_record())
        .expect("first save");
    let second = Manifest::new(2, spec(), EarlyStopping::new(3, 0.0), trained(2, 1.0));
    sink.save_epoch(&second, &vocab, &model, optim.to_record())
        .expect("second save");

    let stored = burn_char_rnn::read_manifest(&sink.epoch_dir(2)).expect("manifest");
    assert_eq!(stored.metrics.map(|m| m.train_loss), Some(1.0));

    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty(), "staging left behind: {leftovers:?}");
}

#[test]
fn final_snapshot_lives_in_the_base_directory() {
    let dir = tempdir().expect("tempdir");
    let device = Default::default();
    let vocab = CharVocab::fit("abcd").expect("vocab");
    let model = CharRnn::<TrainBackend>::new(&spec(), &device);
    let optim = AdamConfig::new().init::<TrainBackend, CharRnn<TrainBackend>>();
    let sink = CheckpointSink::new(dir.path().join("model"));

    assert!(!sink.has_final());
    let manifest = Manifest::new(5, spec(), EarlyStopping::new(3, 0.0), None);
    let base = sink
        .save_final(&manifest, &vocab, &model, optim.to_record())
        .expect("save final");

    assert_eq!(base, sink.base());
    assert!(sink.has_final());
    assert!(sink.epochs().expect("epochs").is_empty());
    let snapshot = Snapshot::<InferBackend>::load(&base, &device).expect("load final");
    assert_eq!(snapshot.manifest.epoch, 5);
}

#[test]
fn missing_checkpoint_is_reported() {
    let dir = tempdir().expect("tempdir");
    let target = dir.path().join("epoch-9");
    let err = Snapshot::<InferBackend>::load(&target, &Default::default()).unwrap_err();
    assert_eq!(err.downcast_ref::<Error>(), Some(&Error::CheckpointNotFound(target)));
}

#[test]
fn vocabulary_size_disagreement_is_corrupt() {
    let dir = tempdir().expect("tempdir");
    let device = Default::default();
    let vocab = CharVocab::fit("abcd").expect("vocab");
    let model = CharRnn::<TrainBackend>::new(&spec(), &device);
    let optim = AdamConfig::new().init::<TrainBackend, CharRnn<TrainBackend>>();
    let sink = CheckpointSink::new(dir.path());

    let manifest = Manifest::new(1, spec(), EarlyStopping::new(3, 0.0), None);
    let saved = sink
        .save_epoch(&manifest, &vocab, &model, optim.to_record())
        .expect("save epoch");
    CharVocab::fit("abc")
        .expect("smaller vocab")
        .save(&saved.join(VOCAB_FILE))
        .expect("overwrite vocab");

    let err = Snapshot::<InferBackend>::load(&saved, &device).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::CorruptCheckpoint { .. })
    ));
}
