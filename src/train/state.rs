use serde::{Serialize, Deserialize};

use crate::checkpoint::CheckpointTag;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every budgeted epoch ran.
    Exhausted,
    /// Validation accuracy stopped improving for `early_stopping_patience` epochs.
    EarlyStopped,
}

/// Lifecycle of an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Schedule, weights and optimizer are being set up. Only observable
    /// from inside `Orchestrator::new`.
    Initializing,
    /// `epoch` epochs have completed so far.
    Running { epoch: usize },
    Stopped(StopReason),
}

/// Progress of a run, owned and mutated only by the orchestrator.
///
/// `best_validation_accuracy` never decreases, and `epochs_since_improvement`
/// drops back to 0 exactly when a new best is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingState {
    epoch: usize,
    best_validation_accuracy: f64,
    best_epoch: Option<usize>,
    epochs_since_improvement: usize,
    learning_rate: f64,
    best_checkpoint: Option<CheckpointTag>,
}

impl TrainingState {
    pub fn new(learning_rate: f64) -> TrainingState {
        TrainingState {
            epoch: 0,
            best_validation_accuracy: 0.0,
            best_epoch: None,
            epochs_since_improvement: 0,
            learning_rate,
            best_checkpoint: None,
        }
    }

    /// Counts one completed epoch with this validation accuracy. Returns
    /// whether it strictly beat the best so far.
    pub fn record(&mut self, validation_accuracy: f64) -> bool {
        self.epoch += 1;
        if validation_accuracy > self.best_validation_accuracy {
            self.best_validation_accuracy = validation_accuracy;
            self.best_epoch = Some(self.epoch);
            self.epochs_since_improvement = 0;
            true
        } else {
            self.epochs_since_improvement += 1;
            false
        }
    }

    pub fn patience_exhausted(&self, patience: usize) -> bool {
        self.epochs_since_improvement >= patience
    }

    /// Epochs completed.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn best_validation_accuracy(&self) -> f64 {
        self.best_validation_accuracy
    }

    /// 1-based epoch that produced the best accuracy.
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn epochs_since_improvement(&self) -> usize {
        self.epochs_since_improvement
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    /// Tag of the checkpoint holding the best parameters, once one is saved.
    pub fn best_checkpoint(&self) -> Option<CheckpointTag> {
        self.best_checkpoint
    }

    pub fn set_best_checkpoint(&mut self, tag: CheckpointTag) {
        self.best_checkpoint = Some(tag);
    }
}
