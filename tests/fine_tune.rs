use ferrite_finetune::checkpoint::{CheckpointStore, CheckpointTag, DirCheckpointStore};
use ferrite_finetune::config::TrainConfig;
use ferrite_finetune::data::{InMemorySplit, Preprocessing};
use ferrite_finetune::model::{BackboneSpec, LayerSpec, ModelAdapter, ModelManifest, StageSpec};
use ferrite_finetune::serve::Predictor;
use ferrite_finetune::train::{NoopObserver, Orchestrator};
use ferrite_finetune::{ActivationFunction, ClassLabelSpace, StagedClassifier};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::tempdir;

const INPUTS: usize = 12;

/// Class 0 leans positive on the first six features, class 1 negative. The
/// rest are label-independent noise.
fn example(i: usize) -> (Vec<f64>, usize) {
    let label = i % 2;
    let sign = if label == 0 { 1.0 } else { -1.0 };
    let x = (0..INPUTS)
        .map(|k| {
            if k < 6 {
                sign * (0.5 + 0.1 * ((i + k) % 5) as f64)
            } else {
                ((i * k) % 7) as f64 / 7.0 * 0.3 - 0.15
            }
        })
        .collect();
    (x, label)
}

fn split(range: std::ops::Range<usize>, batch_size: usize) -> InMemorySplit {
    let (inputs, labels): (Vec<_>, Vec<_>) = range.map(example).unzip();
    InMemorySplit::new(inputs, labels, batch_size).unwrap()
}

fn architecture() -> BackboneSpec {
    let layer = |size| LayerSpec { size, activation: ActivationFunction::Tanh };
    BackboneSpec {
        name: "toy".into(),
        input_size: INPUTS,
        stages: vec![
            StageSpec { name: "stem".into(), layers: vec![layer(8)] },
            StageSpec { name: "block".into(), layers: vec![layer(8)] },
        ],
        num_classes: 5,
    }
}

#[test]
fn fine_tunes_the_last_stage_and_serves_the_best_checkpoint() {
    let dir = tempdir().unwrap();
    let classes = ClassLabelSpace::new(["ai", "real"]).unwrap();
    let model = StagedClassifier::from_spec(&architecture(), &mut StdRng::seed_from_u64(7)).unwrap();
    let stem_before = model.snapshot().get("stem.0.weight").cloned().unwrap();

    let config = TrainConfig {
        batch_size: 8,
        epochs: 30,
        learning_rate: 0.01,
        early_stopping_patience: 30,
        trainable_stages: 1,
        seed: 7,
        ..TrainConfig::light()
    };
    let store = DirCheckpointStore::create(dir.path()).unwrap();
    let mut orch = Orchestrator::new(config, model, classes.clone(), &[40, 40], store).unwrap();
    assert_eq!(orch.model().num_classes(), 2);

    let manifest = ModelManifest {
        architecture: orch.model().architecture(),
        classes: classes.clone(),
        preprocessing: Preprocessing { width: 2, height: 2, ..Preprocessing::default() },
        description: None,
    };
    orch.store().save_manifest(&manifest).unwrap();

    let mut train = split(0..80, 8).shuffled(1);
    let mut val = split(80..120, 16);
    let summary = orch.run(&mut train, &mut val, &mut NoopObserver).unwrap();
    assert!(summary.best_validation_accuracy >= 0.9, "best {}", summary.best_validation_accuracy);
    assert_eq!(summary.history.len(), summary.epochs_completed);

    let (model, store) = orch.into_parts();
    assert_eq!(model.snapshot().get("stem.0.weight"), Some(&stem_before));
    assert!(store.load(CheckpointTag::Final).is_ok());
    assert!(store.history_path().is_file());

    let predictor = Predictor::load(dir.path(), CheckpointTag::Best, None).unwrap();
    let correct = (80..120)
        .map(example)
        .filter(|(x, y)| {
            let verdict = predictor.predict_input(x).unwrap().verdict;
            classes.index_of(&verdict) == Some(*y)
        })
        .count();
    assert!(correct as f64 / 40.0 >= summary.best_validation_accuracy - 1e-9);
}
