use serde::{Serialize, Deserialize};

use crate::checkpoint::history::History;
use crate::train::state::StopReason;

/// What happened in one epoch, handed to observers once the epoch's
/// stopping decision is made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Epoch budget of the run.
    pub total_epochs: usize,
    /// Mean weighted training loss over all samples in this epoch.
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub validation_accuracy: f64,
    /// Rate in effect after this epoch's scheduler step.
    pub learning_rate: f64,
    /// Whether this epoch set a new best and was saved as `best`.
    pub improved: bool,
    pub epochs_since_improvement: usize,
    /// Validation predictions, in validation order.
    pub predictions: Vec<usize>,
    /// Validation labels, in validation order.
    pub labels: Vec<usize>,
    /// Wall-clock duration of the epoch in milliseconds.
    pub elapsed_ms: u64,
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub epochs_completed: usize,
    pub stop_reason: StopReason,
    pub best_validation_accuracy: f64,
    /// 1-based epoch saved as `best`, if any epoch improved.
    pub best_epoch: Option<usize>,
    pub final_learning_rate: f64,
    pub history: History,
}
