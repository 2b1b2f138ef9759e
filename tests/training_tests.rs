use std::fs;

use burn_autodiff::Autodiff;
use burn_char_rnn::{
    CharVocab, CheckpointSink, Error, Generator, ModelSpec, Snapshot, StopReason, Trainer,
    TrainingHyperparameters, WindowDataset,
};
use burn_ndarray::NdArray;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tempfile::tempdir;

type TrainBackend = Autodiff<NdArray<f32>>;
type InferBackend = NdArray<f32>;

const WINDOW: usize = 3;

fn cyclic_corpus() -> (CharVocab, WindowDataset) {
    let corpus = "abc".repeat(100);
    let vocab = CharVocab::fit(&corpus).expect("vocab");
    let tokens = vocab.encode(&corpus).expect("encode");
    let dataset = WindowDataset::new(tokens, WINDOW, 0.0).expect("frame corpus");
    (vocab, dataset)
}

fn tiny_spec(vocab: &CharVocab) -> ModelSpec {
    ModelSpec {
        vocab_size: vocab.len(),
        window: WINDOW,
        embedding_dim: 8,
        hidden_dim: 16,
        num_layers: 1,
        dropout: 0.0,
        recurrent_dropout: 0.0,
    }
}

fn hyperparameters(epochs: usize) -> TrainingHyperparameters {
    TrainingHyperparameters {
        window: WINDOW,
        batch_size: 16,
        epochs,
        validation_split: 0.0,
        patience: 100,
        min_delta: 0.0,
        seed: 7,
    }
}

fn trainer(spec: ModelSpec, epochs: usize, sink: CheckpointSink) -> Trainer<TrainBackend> {
    Trainer::new(spec, hyperparameters(epochs), 1e-2, sink, Default::default())
}

#[test]
fn cyclic_corpus_is_reproduced_at_low_temperature() {
    let dir = tempdir().expect("tempdir");
    let (vocab, dataset) = cyclic_corpus();
    assert_eq!(dataset.example(0).1, vocab.index('a').expect("a"));

    let sink = CheckpointSink::new(dir.path().join("cyclic"));
    let (_, report) = trainer(tiny_spec(&vocab), 40, sink.clone())
        .fit(&vocab, &dataset, None)
        .expect("train");

    assert_eq!(report.stop_reason, StopReason::EpochBudget);
    assert_eq!(report.epochs.len(), 40);
    let last = report.epochs.last().expect("epochs ran");
    assert!(last.train_loss < 0.1, "loss did not converge: {}", last.train_loss);
    assert!(last.train_accuracy > 0.95, "accuracy {}", last.train_accuracy);
    assert!(last.valid_loss.is_none());
    assert!(last.valid_accuracy.is_none());

    let device = Default::default();
    let snapshot = Snapshot::<InferBackend>::load(sink.base(), &device).expect("final snapshot");
    assert_eq!(snapshot.manifest.epoch, 40);
    let generator = Generator::from_snapshot(snapshot, device);

    // "ab" alone would be padded with the sentinel, whose symbol is 'a'.
    let mut rng = StdRng::seed_from_u64(11);
    let mut sink = Vec::new();
    let text = generator
        .generate_chars("abcab", 9, 0.01, &mut rng, &mut sink)
        .expect("generate");
    assert_eq!(text, format!("abcab{}", "cab".repeat(3)));
}

#[test]
fn resumed_run_writes_the_same_checkpoints() {
    let dir = tempdir().expect("tempdir");
    let (vocab, dataset) = cyclic_corpus();
    let spec = tiny_spec(&vocab);

    let straight = CheckpointSink::new(dir.path().join("straight"));
    trainer(spec.clone(), 3, straight.clone())
        .fit(&vocab, &dataset, None)
        .expect("uninterrupted run");

    let resumed = CheckpointSink::new(dir.path().join("resumed"));
    trainer(spec.clone(), 1, resumed.clone())
        .fit(&vocab, &dataset, None)
        .expect("first leg");
    let (_, report) = trainer(spec, 3, resumed.clone())
        .fit(&vocab, &dataset, Some(1))
        .expect("second leg");

    assert_eq!(report.start_epoch, 1);
    assert_eq!(
        report.epochs.iter().map(|s| s.epoch).collect::<Vec<_>>(),
        vec![2, 3]
    );
    assert_eq!(straight.epochs().expect("epochs"), vec![1, 2, 3]);
    assert_eq!(resumed.epochs().expect("epochs"), vec![1, 2, 3]);

    let manifest = burn_char_rnn::read_manifest(resumed.base()).expect("final manifest");
    assert_eq!(manifest.epoch, 3);
}

#[test]
fn resuming_past_the_budget_only_refreshes_the_final_snapshot() {
    let dir = tempdir().expect("tempdir");
    let (vocab, dataset) = cyclic_corpus();
    let spec = tiny_spec(&vocab);
    let sink = CheckpointSink::new(dir.path().join("done"));

    trainer(spec.clone(), 2, sink.clone())
        .fit(&vocab, &dataset, None)
        .expect("train");
    let (_, report) = trainer(spec, 2, sink.clone())
        .fit(&vocab, &dataset, Some(2))
        .expect("resume");

    assert_eq!(report.stop_reason, StopReason::AlreadyComplete);
    assert!(report.epochs.is_empty());
    assert_eq!(sink.epochs().expect("epochs"), vec![1, 2]);
    assert_eq!(burn_char_rnn::read_manifest(sink.base()).expect("final").epoch, 2);
}

#[test]
fn resume_rejects_a_different_architecture() {
    let dir = tempdir().expect("tempdir");
    let (vocab, dataset) = cyclic_corpus();
    let sink = CheckpointSink::new(dir.path().join("arch"));

    trainer(tiny_spec(&vocab), 1, sink.clone())
        .fit(&vocab, &dataset, None)
        .expect("train");

    let mut wider = tiny_spec(&vocab);
    wider.hidden_dim = 24;
    let err = trainer(wider, 2, sink)
        .fit(&vocab, &dataset, Some(1))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::CheckpointMismatch { .. })
    ));
}

#[test]
fn resume_from_a_missing_epoch_fails() {
    let dir = tempdir().expect("tempdir");
    let (vocab, dataset) = cyclic_corpus();
    let sink = CheckpointSink::new(dir.path().join("empty"));

    let err = trainer(tiny_spec(&vocab), 2, sink.clone())
        .fit(&vocab, &dataset, Some(4))
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<Error>(),
        Some(&Error::CheckpointNotFound(sink.epoch_dir(4)))
    );
}

#[test]
fn validation_loss_drives_early_stopping() {
    let dir = tempdir().expect("tempdir");
    let corpus = "abc".repeat(100);
    let vocab = CharVocab::fit(&corpus).expect("vocab");
    let dataset =
        WindowDataset::new(vocab.encode(&corpus).expect("encode"), WINDOW, 0.2).expect("frame");

    // No finite drop can beat a margin this wide, so epoch 2 is stale.
    let mut hyper = hyperparameters(10);
    hyper.validation_split = 0.2;
    hyper.patience = 1;
    hyper.min_delta = 1e9;
    let sink = CheckpointSink::new(dir.path().join("early"));
    let trainer = Trainer::<TrainBackend>::new(
        tiny_spec(&vocab),
        hyper,
        1e-2,
        sink.clone(),
        Default::default(),
    );

    let (_, report) = trainer.fit(&vocab, &dataset, None).expect("train");
    assert_eq!(report.stop_reason, StopReason::EarlyStopped { epoch: 2 });
    assert_eq!(report.last_epoch(), 2);
    assert_eq!(report.early_stopping.best_epoch, Some(1));
    assert_eq!(report.early_stopping.stale_epochs, 1);
    assert_eq!(sink.epochs().expect("epochs"), vec![1, 2]);
    for summary in &report.epochs {
        assert!(summary.valid_loss.is_some());
        let accuracy = summary.valid_accuracy.expect("validation accuracy");
        assert!((0.0..=1.0).contains(&accuracy));
    }

    let manifest = burn_char_rnn::read_manifest(sink.base()).expect("final manifest");
    assert_eq!(manifest.epoch, 2);
    assert_eq!(manifest.early_stopping, report.early_stopping);
    assert_eq!(manifest.metrics.as_ref(), report.epochs.last());
}

#[test]
fn unwritable_checkpoint_location_aborts_training() {
    let dir = tempdir().expect("tempdir");
    let (vocab, dataset) = cyclic_corpus();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, b"occupied").expect("write blocker");

    let sink = CheckpointSink::new(blocker.clone());
    let result = trainer(tiny_spec(&vocab), 2, sink).fit(&vocab, &dataset, None);

    let err = match result {
        Ok(_) => panic!("training must fail when checkpoints cannot be written"),
        Err(err) => err,
    };
    assert!(format!("{err:#}").contains(&blocker.display().to_string()));
    assert!(blocker.is_file());
    assert_eq!(fs::read(&blocker).expect("read blocker"), b"occupied");
}
