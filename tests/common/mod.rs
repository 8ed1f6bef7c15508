#![allow(dead_code)]

use ferrite_finetune::data::InMemorySplit;
use ferrite_finetune::error::Result;
use ferrite_finetune::layers::param::Param;
use ferrite_finetune::model::{ForwardMode, ModelAdapter, ParamMut, ParamSnapshot};
use ferrite_finetune::Matrix;
use rand::rngs::StdRng;

/// A model whose validation accuracy per epoch is scripted.
///
/// Inputs are `[label]`. In `Eval` mode the first `round(acc * val_len)`
/// rows of each validation pass are classified correctly and the rest are
/// flipped. Training forwards return zero scores, or NaN from the
/// `diverge_at`-th training forward on.
pub struct ScriptedModel {
    plan: Vec<f64>,
    val_len: usize,
    eval_rows: usize,
    train_forwards: usize,
    pub diverge_at: Option<usize>,
    stages: Vec<(String, Param)>,
    head: Param,
}

impl ScriptedModel {
    pub fn new(stage_count: usize, plan: &[f64], val_len: usize) -> ScriptedModel {
        let stages = (0..stage_count)
            .map(|i| (format!("block{}", i), Param::new(Matrix::row(vec![1.0]))))
            .collect();
        ScriptedModel {
            plan: plan.to_vec(),
            val_len,
            eval_rows: 0,
            train_forwards: 0,
            diverge_at: None,
            stages,
            head: Param::new(Matrix::zeros(1, 2)),
        }
    }

    pub fn diverging_at(mut self, train_forward: usize) -> ScriptedModel {
        self.diverge_at = Some(train_forward);
        self
    }

    pub fn is_stage_trainable(&self, i: usize) -> bool {
        self.stages[i].1.trainable
    }

    fn planned_accuracy(&self, epoch: usize) -> f64 {
        let last = self.plan.len().saturating_sub(1);
        self.plan.get(epoch.min(last)).copied().unwrap_or(0.0)
    }
}

impl ModelAdapter for ScriptedModel {
    fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|(n, _)| n.clone()).collect()
    }

    fn num_classes(&self) -> usize {
        self.head.value.cols
    }

    fn freeze_all(&mut self) {
        for (_, p) in &mut self.stages {
            p.trainable = false;
        }
        self.head.trainable = false;
    }

    fn unfreeze_stage(&mut self, stage: usize) -> bool {
        match self.stages.get_mut(stage) {
            Some((_, p)) => {
                p.trainable = true;
                true
            }
            None => false,
        }
    }

    fn replace_head(&mut self, num_classes: usize, _rng: &mut StdRng) {
        self.head = Param::new(Matrix::zeros(1, num_classes));
    }

    fn forward(&mut self, inputs: &[Vec<f64>], mode: ForwardMode) -> Result<Vec<Vec<f64>>> {
        let n = self.num_classes();
        match mode {
            ForwardMode::Train => {
                self.train_forwards += 1;
                let value = match self.diverge_at {
                    Some(k) if self.train_forwards >= k => f64::NAN,
                    _ => 0.0,
                };
                Ok(vec![vec![value; n]; inputs.len()])
            }
            ForwardMode::Eval => Ok(inputs
                .iter()
                .map(|x| {
                    let epoch = self.eval_rows / self.val_len;
                    let idx = self.eval_rows % self.val_len;
                    self.eval_rows += 1;
                    let correct = (self.planned_accuracy(epoch) * self.val_len as f64).round() as usize;
                    let label = x[0] as usize;
                    let predicted = if idx < correct { label } else { (label + 1) % n };
                    let mut scores = vec![0.0; n];
                    scores[predicted] = 1.0;
                    scores
                })
                .collect()),
        }
    }

    fn backward(&mut self, score_grads: &[Vec<f64>]) -> Result<()> {
        let g: f64 = score_grads.iter().flatten().sum();
        for (_, p) in self.stages.iter_mut().filter(|(_, p)| p.trainable) {
            p.accumulate(&Matrix::row(vec![g + 0.1]));
        }
        if self.head.trainable {
            let cols = self.head.value.cols;
            self.head.accumulate(&Matrix::row(vec![g + 0.1; cols]));
        }
        Ok(())
    }

    fn zero_grad(&mut self) {
        for (_, p) in &mut self.stages {
            p.zero_grad();
        }
        self.head.zero_grad();
    }

    fn trainable_params(&mut self) -> Vec<ParamMut<'_>> {
        let mut out: Vec<ParamMut<'_>> = self
            .stages
            .iter_mut()
            .filter(|(_, p)| p.trainable)
            .map(|(name, param)| ParamMut { name: format!("{}.weight", name), param })
            .collect();
        if self.head.trainable {
            out.push(ParamMut { name: "head.weight".into(), param: &mut self.head });
        }
        out
    }

    fn snapshot(&self) -> ParamSnapshot {
        let mut snap = ParamSnapshot::new();
        for (name, p) in &self.stages {
            snap.insert(format!("{}.weight", name), p.value.clone());
        }
        snap.insert("head.weight", self.head.value.clone());
        snap
    }

    fn restore(&mut self, snapshot: &ParamSnapshot) -> Result<()> {
        for (name, p) in &mut self.stages {
            if let Some(v) = snapshot.get(&format!("{}.weight", name)) {
                p.value = v.clone();
            }
        }
        if let Some(v) = snapshot.get("head.weight") {
            self.head.value = v.clone();
        }
        Ok(())
    }
}

/// `n` examples alternating between class 0 and class 1, in order.
pub fn alternating_split(n: usize, batch_size: usize) -> InMemorySplit {
    let labels: Vec<usize> = (0..n).map(|i| i % 2).collect();
    let inputs = labels.iter().map(|&y| vec![y as f64]).collect();
    InMemorySplit::new(inputs, labels, batch_size).unwrap()
}
