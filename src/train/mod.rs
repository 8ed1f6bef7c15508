pub mod class_weights;
pub mod epoch_metrics;
pub mod observer;
pub mod orchestrator;
pub mod plateau;
pub mod schedule;
pub mod state;

pub use class_weights::ClassWeights;
pub use epoch_metrics::{EpochMetrics, RunSummary};
pub use observer::{ChannelObserver, EpochObserver, LogObserver, NoopObserver};
pub use orchestrator::Orchestrator;
pub use plateau::PlateauScheduler;
pub use schedule::{FineTuneSchedule, TrainableSet};
pub use state::{RunPhase, StopReason, TrainingState};
