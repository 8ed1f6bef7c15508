use std::sync::mpsc;

use tracing::{debug, info, warn};

use crate::metrics::evaluator::evaluate;
use crate::model::labels::ClassLabelSpace;
use crate::train::epoch_metrics::{EpochMetrics, RunSummary};

/// Receives progress at epoch boundaries. The orchestrator never prints;
/// presentation lives in implementations of this trait.
pub trait EpochObserver {
    /// Called once per epoch, after its checkpoint and stopping decisions.
    fn on_epoch_end(&mut self, metrics: &EpochMetrics);

    /// Called once, after `final` and the history are written.
    fn on_run_end(&mut self, _summary: &RunSummary) {}
}

impl<F> EpochObserver for F
where
    F: FnMut(&EpochMetrics),
{
    fn on_epoch_end(&mut self, metrics: &EpochMetrics) {
        self(metrics)
    }
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl EpochObserver for NoopObserver {
    fn on_epoch_end(&mut self, _metrics: &EpochMetrics) {}
}

/// Logs a summary line per epoch at `info`, and the validation class
/// report at `debug`.
#[derive(Debug, Clone)]
pub struct LogObserver {
    classes: ClassLabelSpace,
}

impl LogObserver {
    pub fn new(classes: ClassLabelSpace) -> LogObserver {
        LogObserver { classes }
    }
}

impl EpochObserver for LogObserver {
    fn on_epoch_end(&mut self, m: &EpochMetrics) {
        info!(
            "Epoch {}/{} | loss {:.4} | train acc {:.4} | val acc {:.4} | lr {:.2e}{} | {} ms",
            m.epoch,
            m.total_epochs,
            m.train_loss,
            m.train_accuracy,
            m.validation_accuracy,
            m.learning_rate,
            if m.improved { " | new best" } else { "" },
            m.elapsed_ms,
        );
        if tracing::enabled!(tracing::Level::DEBUG) {
            match evaluate(&m.predictions, &m.labels, &self.classes) {
                Ok(report) => debug!("Validation report, epoch {}\n{}", m.epoch, report),
                Err(e) => warn!("could not build validation report: {}", e),
            }
        }
    }

    fn on_run_end(&mut self, s: &RunSummary) {
        info!(
            epochs = s.epochs_completed,
            reason = ?s.stop_reason,
            best_val_acc = s.best_validation_accuracy,
            best_epoch = ?s.best_epoch,
            "Training finished"
        );
    }
}

/// Forwards each `EpochMetrics` over a channel, e.g. to a UI thread.
/// A dropped receiver is logged once and otherwise ignored; training does
/// not stop mid-run.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: mpsc::Sender<EpochMetrics>,
    disconnected: bool,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<EpochMetrics>) -> ChannelObserver {
        ChannelObserver { tx, disconnected: false }
    }
}

impl EpochObserver for ChannelObserver {
    fn on_epoch_end(&mut self, metrics: &EpochMetrics) {
        if self.disconnected {
            return;
        }
        if self.tx.send(metrics.clone()).is_err() {
            warn!("progress receiver dropped; further epochs are not forwarded");
            self.disconnected = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(epoch: usize) -> EpochMetrics {
        EpochMetrics {
            epoch,
            total_epochs: 3,
            train_loss: 0.5,
            train_accuracy: 0.6,
            validation_accuracy: 0.7,
            learning_rate: 1e-3,
            improved: true,
            epochs_since_improvement: 0,
            predictions: vec![0, 1],
            labels: vec![0, 0],
            elapsed_ms: 1,
        }
    }

    #[test]
    fn channel_forwards_in_order() {
        let (tx, rx) = mpsc::channel();
        let mut obs = ChannelObserver::new(tx);
        obs.on_epoch_end(&metrics(1));
        obs.on_epoch_end(&metrics(2));
        let got: Vec<usize> = rx.try_iter().map(|m| m.epoch).collect();
        assert_eq!(got, vec![1, 2]);
    }

    #[test]
    fn dropped_receiver_is_tolerated() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut obs = ChannelObserver::new(tx);
        obs.on_epoch_end(&metrics(1));
        obs.on_epoch_end(&metrics(2));
        assert!(obs.disconnected);
    }

    #[test]
    fn closures_observe() {
        let mut seen = Vec::new();
        {
            let mut obs = |m: &EpochMetrics| seen.push(m.epoch);
            obs.on_epoch_end(&metrics(4));
        }
        assert_eq!(seen, vec![4]);
    }
}
