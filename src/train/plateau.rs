use crate::config::PlateauConfig;

/// Reduce-on-plateau learning-rate schedule in "max" mode.
///
/// Tracks its own best value and bad-epoch count, separate from early
/// stopping. An observation counts as an improvement when it beats the best
/// by the relative `threshold`. Once the bad-epoch count exceeds `patience`
/// the rate is multiplied by `factor` (floored at `min_lr`) and the count
/// starts over.
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    config: PlateauConfig,
    best: f64,
    bad_epochs: usize,
}

impl PlateauScheduler {
    pub fn new(config: PlateauConfig) -> PlateauScheduler {
        PlateauScheduler { config, best: f64::NEG_INFINITY, bad_epochs: 0 }
    }

    /// Feeds one validation accuracy and returns the learning rate to use
    /// from now on.
    pub fn observe(&mut self, metric: f64, lr: f64) -> f64 {
        if metric > self.best * (1.0 + self.config.threshold) {
            self.best = metric;
            self.bad_epochs = 0;
            return lr;
        }

        self.bad_epochs += 1;
        if self.bad_epochs > self.config.patience {
            self.bad_epochs = 0;
            return (lr * self.config.factor).max(self.config.min_lr);
        }
        lr
    }

    pub fn bad_epochs(&self) -> usize {
        self.bad_epochs
    }

    pub fn best(&self) -> f64 {
        self.best
    }
}
