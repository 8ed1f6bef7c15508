pub mod math;
pub mod activation;
pub mod layers;
pub mod model;
pub mod loss;
pub mod optim;
pub mod data;
pub mod train;
pub mod metrics;
pub mod checkpoint;
pub mod serve;
pub mod config;
pub mod error;
pub mod logging;

// Convenience re-exports
pub use math::matrix::Matrix;
pub use activation::activation::ActivationFunction;
pub use layers::dense::Layer;
pub use model::{BackboneSpec, ClassLabelSpace, ModelAdapter, ModelManifest, StagedClassifier};
pub use loss::WeightedCrossEntropy;
pub use optim::{Adam, Optimizer, Sgd};
pub use data::{AugmentationPolicy, BatchSource, ImageFolder, InMemorySplit, Preprocessing};
pub use train::{EpochObserver, Orchestrator, RunSummary, StopReason};
pub use metrics::{evaluate, Evaluation};
pub use checkpoint::{CheckpointStore, CheckpointTag, DirCheckpointStore};
pub use serve::Predictor;
pub use config::{RunConfig, TrainConfig};
pub use error::{Error, Result};
