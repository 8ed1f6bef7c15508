use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::checkpoint::history::HistoryEntry;
use crate::checkpoint::store::CheckpointStore;
use crate::checkpoint::CheckpointTag;
use crate::config::TrainConfig;
use crate::data::batch::BatchSource;
use crate::error::{Error, Result};
use crate::loss::weighted_ce::WeightedCrossEntropy;
use crate::metrics::evaluator::argmax;
use crate::model::adapter::{ForwardMode, ModelAdapter};
use crate::model::labels::ClassLabelSpace;
use crate::optim::{build_optimizer, Optimizer};
use crate::train::class_weights::ClassWeights;
use crate::train::epoch_metrics::{EpochMetrics, RunSummary};
use crate::train::observer::EpochObserver;
use crate::train::plateau::PlateauScheduler;
use crate::train::schedule::{FineTuneSchedule, TrainableSet};
use crate::train::state::{RunPhase, StopReason, TrainingState};

/// Drives a fine-tuning run: epochs of training and validation, the
/// learning-rate schedule, early stopping, and checkpointing.
///
/// Everything is decided in `new`: the trainable stages, the class weights,
/// the optimizer and the scheduler. `run` then executes epochs strictly in
/// sequence until the budget is spent or validation accuracy stalls for
/// `early_stopping_patience` epochs.
pub struct Orchestrator<M: ModelAdapter, S: CheckpointStore> {
    config: TrainConfig,
    model: M,
    store: S,
    classes: ClassLabelSpace,
    loss: WeightedCrossEntropy,
    optimizer: Box<dyn Optimizer>,
    scheduler: Option<PlateauScheduler>,
    trainable: TrainableSet,
    state: TrainingState,
    phase: RunPhase,
}

/// Train-pass totals of one epoch.
struct TrainPass {
    loss: f64,
    correct: usize,
    total: usize,
}

/// Validation-pass results of one epoch.
struct ValidationPass {
    predictions: Vec<usize>,
    labels: Vec<usize>,
    correct: usize,
}

impl<M: ModelAdapter, S: CheckpointStore> Orchestrator<M, S> {
    /// Prepares a run. `class_counts[c]` is the number of training examples
    /// of class `c`; the model is frozen, partially unfrozen, and given a new
    /// head sized to `classes`.
    pub fn new(
        config: TrainConfig,
        mut model: M,
        classes: ClassLabelSpace,
        class_counts: &[usize],
        store: S,
    ) -> Result<Self> {
        let mut phase = RunPhase::Initializing;
        debug!(?phase, "preparing fine-tuning run");

        config.validate()?;
        if classes.len() < 2 {
            return Err(Error::InvalidInput(format!(
                "a classifier needs at least two classes, got {:?}",
                classes.names()
            )));
        }
        if class_counts.len() != classes.len() {
            return Err(Error::InvalidInput(format!(
                "{} class counts given for {} classes",
                class_counts.len(),
                classes.len()
            )));
        }
        if config.trainable_stages > model.stage_count() {
            return Err(Error::InvalidInput(format!(
                "trainable_stages is {} but the backbone has {} stages",
                config.trainable_stages,
                model.stage_count()
            )));
        }

        let weights = if config.class_weighting {
            ClassWeights::compute(class_counts)?
        } else {
            ClassWeights::uniform(classes.len())?
        };
        info!(counts = ?class_counts, weights = ?weights.as_slice(), "class weights");

        let mut rng = StdRng::seed_from_u64(config.seed);
        let trainable = FineTuneSchedule::last_stages(config.trainable_stages)
            .apply(&mut model, classes.len(), &mut rng);
        let optimizer = build_optimizer(&config, &trainable)?;
        let scheduler = config.plateau.clone().map(PlateauScheduler::new);
        let state = TrainingState::new(config.learning_rate);

        phase = RunPhase::Running { epoch: 0 };
        Ok(Orchestrator {
            config,
            model,
            store,
            classes,
            loss: WeightedCrossEntropy::new(weights),
            optimizer,
            scheduler,
            trainable,
            state,
            phase,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn classes(&self) -> &ClassLabelSpace {
        &self.classes
    }

    pub fn class_weights(&self) -> &ClassWeights {
        self.loss.weights()
    }

    pub fn trainable(&self) -> &TrainableSet {
        &self.trainable
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn into_parts(self) -> (M, S) {
        (self.model, self.store)
    }

    /// Runs epochs until the budget is exhausted or early stopping fires,
    /// then saves `final` and writes the history.
    ///
    /// Errors carry the epoch they happened in and the last checkpoint that
    /// holds good parameters. A diverged batch ends the run without writing
    /// `final`.
    pub fn run(
        &mut self,
        train: &mut dyn BatchSource,
        val: &mut dyn BatchSource,
        observer: &mut dyn EpochObserver,
    ) -> Result<RunSummary> {
        if let RunPhase::Stopped(reason) = self.phase {
            return Err(Error::InvalidInput(format!("this run already stopped ({:?})", reason)));
        }
        if train.is_empty() {
            return Err(Error::InvalidInput("training split is empty".into()));
        }
        if val.is_empty() {
            return Err(Error::InvalidInput("validation split is empty".into()));
        }

        info!(
            epochs = self.config.epochs,
            train = train.len(),
            val = val.len(),
            trainable_params = self.trainable.len(),
            "Starting fine-tuning"
        );

        let reason = loop {
            let epoch = self.state.epoch() + 1;
            let (metrics, stop) = self.run_epoch(epoch, train, val).map_err(|e| self.with_context(e, epoch))?;
            self.phase = RunPhase::Running { epoch: self.state.epoch() };
            observer.on_epoch_end(&metrics);
            if let Some(reason) = stop {
                break reason;
            }
        };

        let epoch = self.state.epoch();
        self.finish().map_err(|e| self.with_context(e, epoch))?;
        self.phase = RunPhase::Stopped(reason);

        let summary = RunSummary {
            epochs_completed: self.state.epoch(),
            stop_reason: reason,
            best_validation_accuracy: self.state.best_validation_accuracy(),
            best_epoch: self.state.best_epoch(),
            final_learning_rate: self.state.learning_rate(),
            history: self.store.history().clone(),
        };
        observer.on_run_end(&summary);
        Ok(summary)
    }

    /// One full epoch: train pass, validation pass, scheduler step,
    /// improvement check, stopping check.
    fn run_epoch(
        &mut self,
        epoch: usize,
        train: &mut dyn BatchSource,
        val: &mut dyn BatchSource,
    ) -> Result<(EpochMetrics, Option<StopReason>)> {
        let started = Instant::now();

        let train_pass = self.train_pass(epoch, train)?;
        let train_accuracy = train_pass.correct as f64 / train_pass.total.max(1) as f64;

        let val_pass = self.validation_pass(val)?;
        let validation_accuracy = val_pass.correct as f64 / val_pass.labels.len().max(1) as f64;

        if let Some(scheduler) = self.scheduler.as_mut() {
            let lr = scheduler.observe(validation_accuracy, self.state.learning_rate());
            if lr != self.state.learning_rate() {
                info!(epoch, from = self.state.learning_rate(), to = lr, "Reducing learning rate");
                self.optimizer.set_learning_rate(lr);
                self.state.set_learning_rate(lr);
            }
        }

        let improved = self.state.record(validation_accuracy);
        if improved {
            self.store.save(CheckpointTag::Best, &self.model.snapshot())?;
            self.state.set_best_checkpoint(CheckpointTag::Best);
        }
        self.store.append_history(HistoryEntry { train_accuracy, validation_accuracy });

        let stop = if self.state.patience_exhausted(self.config.early_stopping_patience) {
            info!(
                epoch,
                patience = self.config.early_stopping_patience,
                best = self.state.best_validation_accuracy(),
                "Early stopping"
            );
            Some(StopReason::EarlyStopped)
        } else if epoch >= self.config.epochs {
            Some(StopReason::Exhausted)
        } else {
            None
        };

        let metrics = EpochMetrics {
            epoch,
            total_epochs: self.config.epochs,
            train_loss: train_pass.loss,
            train_accuracy,
            validation_accuracy,
            learning_rate: self.state.learning_rate(),
            improved,
            epochs_since_improvement: self.state.epochs_since_improvement(),
            predictions: val_pass.predictions,
            labels: val_pass.labels,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        Ok((metrics, stop))
    }

    fn train_pass(&mut self, epoch: usize, train: &mut dyn BatchSource) -> Result<TrainPass> {
        let last_good = self.state.best_checkpoint();
        let diverged = move |batch: usize, detail: String| Error::TrainingDiverged { epoch, batch, detail, last_good };

        let mut pass = TrainPass { loss: 0.0, correct: 0, total: 0 };
        for (i, batch) in train.epoch().enumerate() {
            let batch_no = i + 1;
            self.model.zero_grad();
            let scores = self.model.forward(batch.inputs(), ForwardMode::Train)?;
            let out = self.loss.compute(&scores, batch.labels())?;
            if !out.loss.is_finite() {
                return Err(diverged(batch_no, format!("non-finite loss {}", out.loss)));
            }
            self.model.backward(&out.score_grads)?;

            let mut params = self.model.trainable_params();
            if let Some(bad) = params.iter().find(|p| !p.param.grad.is_finite()) {
                return Err(diverged(batch_no, format!("non-finite gradient in {}", bad.name)));
            }
            self.optimizer.step(&mut params);

            pass.loss += out.loss * batch.len() as f64;
            pass.total += batch.len();
            pass.correct += scores.iter().zip(batch.labels())
                .filter(|(s, y)| argmax(s) == **y)
                .count();
        }
        if pass.total > 0 {
            pass.loss /= pass.total as f64;
        }
        Ok(pass)
    }

    fn validation_pass(&mut self, val: &mut dyn BatchSource) -> Result<ValidationPass> {
        let mut pass = ValidationPass { predictions: Vec::new(), labels: Vec::new(), correct: 0 };
        for batch in val.epoch() {
            let scores = self.model.forward(batch.inputs(), ForwardMode::Eval)?;
            for (s, &y) in scores.iter().zip(batch.labels()) {
                let p = argmax(s);
                if p == y {
                    pass.correct += 1;
                }
                pass.predictions.push(p);
                pass.labels.push(y);
            }
        }
        Ok(pass)
    }

    /// Terminal writes: `final` snapshot, then the buffered history.
    fn finish(&mut self) -> Result<()> {
        self.store.save(CheckpointTag::Final, &self.model.snapshot())?;
        self.store.flush_history()?;
        debug!(epochs = self.store.history().len(), "wrote final checkpoint and history");
        Ok(())
    }

    /// Attaches the run position to errors that do not already carry it.
    fn with_context(&self, err: Error, epoch: usize) -> Error {
        match err {
            e @ (Error::TrainingDiverged { .. } | Error::RunAborted { .. }) => {
                warn!(error = %e, "run failed");
                e
            }
            other => {
                warn!(epoch, error = %other, "run aborted");
                Error::RunAborted {
                    epoch,
                    last_good: self.state.best_checkpoint(),
                    source: Box::new(other),
                }
            }
        }
    }
}
