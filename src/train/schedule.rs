use rand::rngs::StdRng;
use tracing::info;

use crate::model::adapter::ModelAdapter;

/// Which backbone stages are trained, fixed before the run starts.
///
/// `apply` takes `self` by value: a schedule is used once, on one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FineTuneSchedule {
    last_stages: usize,
}

/// Names of the parameters a schedule left trainable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainableSet {
    names: Vec<String>,
}

impl TrainableSet {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FineTuneSchedule {
    /// Trains the `n` stages closest to the head, plus the head.
    pub fn last_stages(n: usize) -> FineTuneSchedule {
        FineTuneSchedule { last_stages: n }
    }

    /// Trains only the replaced head.
    pub fn head_only() -> FineTuneSchedule {
        FineTuneSchedule { last_stages: 0 }
    }

    pub fn stages(&self) -> usize {
        self.last_stages
    }

    /// Freezes the whole model, unfreezes the selected stage suffix, and
    /// swaps in a fresh trainable head with `num_classes` outputs.
    pub fn apply<M: ModelAdapter + ?Sized>(self, model: &mut M, num_classes: usize, rng: &mut StdRng) -> TrainableSet {
        model.freeze_all();

        let stage_count = model.stage_count();
        let first = stage_count.saturating_sub(self.last_stages);
        for stage in first..stage_count {
            model.unfreeze_stage(stage);
        }
        model.replace_head(num_classes, rng);

        let names: Vec<String> = model.trainable_params().into_iter().map(|p| p.name).collect();
        let stage_names = model.stage_names();
        info!(
            unfrozen = ?&stage_names[first..],
            frozen = first,
            params = names.len(),
            "applied fine-tuning schedule"
        );
        TrainableSet { names }
    }
}
