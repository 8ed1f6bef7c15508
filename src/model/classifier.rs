use std::collections::BTreeSet;
use std::path::Path;

use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::layers::dense::{Layer, LayerTrace};
use crate::model::adapter::{ForwardMode, ModelAdapter, ParamMut};
use crate::model::snapshot::ParamSnapshot;
use crate::model::spec::{BackboneSpec, LayerSpec, StageSpec, HEAD_NAME};

/// A named group of layers, frozen and unfrozen together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub layers: Vec<Layer>,
}

/// Dense backbone split into stages, followed by a linear head.
///
/// Serialized whole (architecture and weights) this is the "pretrained"
/// file a run starts from. Checkpoints only store a `ParamSnapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedClassifier {
    pub name: String,
    pub input_size: usize,
    pub stages: Vec<Stage>,
    pub head: Layer,
    /// Per sample, per layer (stage layers in order, then the head).
    #[serde(skip)]
    traces: Vec<Vec<LayerTrace>>,
}

fn param_name(owner: &str, index: Option<usize>, kind: &str) -> String {
    match index {
        Some(i) => format!("{}.{}.{}", owner, i, kind),
        None => format!("{}.{}", owner, kind),
    }
}

impl StagedClassifier {
    /// Builds a freshly initialized network from an architecture description.
    pub fn from_spec(spec: &BackboneSpec, rng: &mut StdRng) -> Result<StagedClassifier> {
        spec.validate()?;
        let mut width = spec.input_size;
        let stages = spec.stages.iter().map(|stage| {
            let layers = stage.layers.iter().map(|l| {
                let layer = Layer::new(width, l.size, l.activation, rng);
                width = l.size;
                layer
            }).collect();
            Stage { name: stage.name.clone(), layers }
        }).collect();
        let head = Layer::new(width, spec.num_classes, ActivationFunction::Identity, rng);

        Ok(StagedClassifier {
            name: spec.name.clone(),
            input_size: spec.input_size,
            stages,
            head,
            traces: Vec::new(),
        })
    }

    /// Describes the current network, including its current head width.
    pub fn architecture(&self) -> BackboneSpec {
        BackboneSpec {
            name: self.name.clone(),
            input_size: self.input_size,
            stages: self.stages.iter().map(|s| StageSpec {
                name: s.name.clone(),
                layers: s.layers.iter()
                    .map(|l| LayerSpec { size: l.size(), activation: l.activation })
                    .collect(),
            }).collect(),
            num_classes: self.head.size(),
        }
    }

    pub fn feature_size(&self) -> usize {
        self.stages.iter()
            .flat_map(|s| s.layers.last())
            .last()
            .map(|l| l.size())
            .unwrap_or(self.input_size)
    }

    fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.stages.iter().flat_map(|s| s.layers.iter()).chain(std::iter::once(&self.head))
    }

    fn layers_mut(&mut self) -> impl Iterator<Item = &mut Layer> {
        self.stages.iter_mut().flat_map(|s| s.layers.iter_mut()).chain(std::iter::once(&mut self.head))
    }

    fn check_input(&self, input: &[f64]) -> Result<()> {
        if input.len() != self.input_size {
            return Err(Error::InvalidInput(format!(
                "input has {} values, model expects {}",
                input.len(),
                self.input_size
            )));
        }
        Ok(())
    }

    /// Gradient-free scores for one input. Usable through a shared reference.
    pub fn predict_scores(&self, input: &[f64]) -> Result<Vec<f64>> {
        self.check_input(input)?;
        let mut current = input.to_vec();
        for layer in self.layers() {
            current = layer.forward(&current).1;
        }
        Ok(current)
    }

    /// Number of scalar parameters, frozen ones included.
    pub fn parameter_count(&self) -> usize {
        self.layers().map(|l| l.weights.value.len() + l.biases.value.len()).sum()
    }

    /// Serializes architecture and weights to a pretty-printed JSON file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Loads a network previously written by `save_json`.
    pub fn load_json(path: &Path) -> Result<StagedClassifier> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let model: StagedClassifier = serde_json::from_reader(reader)?;
        model.architecture().validate()?;
        Ok(model)
    }
}

impl ModelAdapter for StagedClassifier {
    fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }

    fn num_classes(&self) -> usize {
        self.head.size()
    }

    fn freeze_all(&mut self) {
        for layer in self.layers_mut() {
            layer.set_trainable(false);
        }
    }

    fn unfreeze_stage(&mut self, stage: usize) -> bool {
        match self.stages.get_mut(stage) {
            Some(stage) => {
                for layer in &mut stage.layers {
                    layer.set_trainable(true);
                }
                true
            }
            None => false,
        }
    }

    fn replace_head(&mut self, num_classes: usize, rng: &mut StdRng) {
        self.head = Layer::new(self.feature_size(), num_classes, ActivationFunction::Identity, rng);
        self.head.set_trainable(true);
        self.traces.clear();
    }

    fn forward(&mut self, inputs: &[Vec<f64>], mode: ForwardMode) -> Result<Vec<Vec<f64>>> {
        if mode == ForwardMode::Eval {
            return inputs.iter().map(|x| self.predict_scores(x)).collect();
        }

        self.traces.clear();
        let mut scores = Vec::with_capacity(inputs.len());
        for input in inputs {
            self.check_input(input)?;
            let mut trace = Vec::new();
            let mut current = input.clone();
            for layer in self.layers() {
                let (t, out) = layer.forward(&current);
                trace.push(t);
                current = out;
            }
            self.traces.push(trace);
            scores.push(current);
        }
        Ok(scores)
    }

    fn backward(&mut self, score_grads: &[Vec<f64>]) -> Result<()> {
        if score_grads.len() != self.traces.len() {
            return Err(Error::InvalidInput(format!(
                "backward got {} gradients for a forward batch of {}",
                score_grads.len(),
                self.traces.len()
            )));
        }

        // Nothing below the lowest trainable layer needs a gradient.
        let lowest = match self.layers().position(Layer::is_trainable) {
            Some(i) => i,
            None => return Ok(()),
        };

        let traces = std::mem::take(&mut self.traces);
        {
            let mut layers: Vec<&mut Layer> = self.layers_mut().collect();
            for (sample, grad) in traces.iter().zip(score_grads) {
                let mut delta = grad.clone();
                for idx in (lowest..layers.len()).rev() {
                    match layers[idx].backward(&sample[idx], &delta, idx > lowest) {
                        Some(next) => delta = next,
                        None => break,
                    }
                }
            }
        }
        self.traces = traces;
        Ok(())
    }

    fn zero_grad(&mut self) {
        for layer in self.layers_mut() {
            layer.zero_grad();
        }
    }

    fn trainable_params(&mut self) -> Vec<ParamMut<'_>> {
        let mut out = Vec::new();
        for Stage { name, layers } in self.stages.iter_mut() {
            for (i, layer) in layers.iter_mut().enumerate() {
                if !layer.is_trainable() {
                    continue;
                }
                out.push(ParamMut { name: param_name(name, Some(i), "weight"), param: &mut layer.weights });
                out.push(ParamMut { name: param_name(name, Some(i), "bias"), param: &mut layer.biases });
            }
        }
        if self.head.is_trainable() {
            out.push(ParamMut { name: param_name(HEAD_NAME, None, "weight"), param: &mut self.head.weights });
            out.push(ParamMut { name: param_name(HEAD_NAME, None, "bias"), param: &mut self.head.biases });
        }
        out
    }

    fn snapshot(&self) -> ParamSnapshot {
        let mut snapshot = ParamSnapshot::new();
        for stage in &self.stages {
            for (i, layer) in stage.layers.iter().enumerate() {
                snapshot.insert(param_name(&stage.name, Some(i), "weight"), layer.weights.value.clone());
                snapshot.insert(param_name(&stage.name, Some(i), "bias"), layer.biases.value.clone());
            }
        }
        snapshot.insert(param_name(HEAD_NAME, None, "weight"), self.head.weights.value.clone());
        snapshot.insert(param_name(HEAD_NAME, None, "bias"), self.head.biases.value.clone());
        snapshot
    }

    fn restore(&mut self, snapshot: &ParamSnapshot) -> Result<()> {
        let current = self.snapshot();
        let expected: BTreeSet<&str> = current.names().collect();
        let given: BTreeSet<&str> = snapshot.names().collect();
        if expected != given {
            let missing: Vec<_> = expected.difference(&given).collect();
            let unexpected: Vec<_> = given.difference(&expected).collect();
            return Err(Error::InvalidInput(format!(
                "snapshot does not match architecture (missing {:?}, unexpected {:?})",
                missing, unexpected
            )));
        }
        for (name, value) in current.iter() {
            // Names matched above, so every lookup succeeds.
            if let Some(saved) = snapshot.get(name) {
                if !saved.is_well_formed() {
                    return Err(Error::InvalidInput(format!(
                        "snapshot parameter '{}' claims {}x{} but holds {} rows",
                        name, saved.rows, saved.cols, saved.data.len()
                    )));
                }
                if !saved.same_shape(value) {
                    return Err(Error::InvalidInput(format!(
                        "snapshot parameter '{}' is {}x{}, model has {}x{}",
                        name, saved.rows, saved.cols, value.rows, value.cols
                    )));
                }
            }
        }

        for Stage { name, layers } in self.stages.iter_mut() {
            for (i, layer) in layers.iter_mut().enumerate() {
                if let Some(w) = snapshot.get(&param_name(name, Some(i), "weight")) {
                    layer.weights.value = w.clone();
                }
                if let Some(b) = snapshot.get(&param_name(name, Some(i), "bias")) {
                    layer.biases.value = b.clone();
                }
            }
        }
        if let Some(w) = snapshot.get(&param_name(HEAD_NAME, None, "weight")) {
            self.head.weights.value = w.clone();
        }
        if let Some(b) = snapshot.get(&param_name(HEAD_NAME, None, "bias")) {
            self.head.biases.value = b.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::matrix::Matrix;
    use rand::SeedableRng;

    fn spec() -> BackboneSpec {
        BackboneSpec {
            name: "tiny".into(),
            input_size: 3,
            stages: vec![
                StageSpec { name: "stem".into(), layers: vec![LayerSpec { size: 4, activation: ActivationFunction::Tanh }] },
                StageSpec { name: "block".into(), layers: vec![
                    LayerSpec { size: 5, activation: ActivationFunction::Sigmoid },
                    LayerSpec { size: 3, activation: ActivationFunction::Tanh },
                ] },
            ],
            num_classes: 2,
        }
    }

    fn model() -> StagedClassifier {
        StagedClassifier::from_spec(&spec(), &mut StdRng::seed_from_u64(3)).unwrap()
    }

    /// Sum of scores weighted by fixed coefficients; its gradient w.r.t. the
    /// scores is exactly those coefficients.
    fn objective(scores: &[f64]) -> f64 {
        scores[0] * 0.7 - scores[1] * 1.3
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut m = model();
        let input = vec![0.2, -0.5, 0.9];

        m.zero_grad();
        m.forward(&[input.clone()], ForwardMode::Train).unwrap();
        m.backward(&[vec![0.7, -1.3]]).unwrap();

        let h = 1e-6;
        let analytic = m.stages[0].layers[0].weights.grad.data[1][2];
        let mut plus = m.clone();
        plus.stages[0].layers[0].weights.value.data[1][2] += h;
        let mut minus = m.clone();
        minus.stages[0].layers[0].weights.value.data[1][2] -= h;
        let numeric = (objective(&plus.predict_scores(&input).unwrap())
            - objective(&minus.predict_scores(&input).unwrap())) / (2.0 * h);
        assert!((analytic - numeric).abs() < 1e-6, "analytic {} numeric {}", analytic, numeric);

        let analytic_head_bias = m.head.biases.grad.data[0][1];
        assert!((analytic_head_bias + 1.3).abs() < 1e-12);
    }

    #[test]
    fn frozen_layers_collect_no_gradient() {
        let mut m = model();
        m.freeze_all();
        assert!(m.unfreeze_stage(1));
        assert!(!m.unfreeze_stage(2));
        m.zero_grad();
        m.forward(&[vec![0.1, 0.2, 0.3]], ForwardMode::Train).unwrap();
        m.backward(&[vec![1.0, -1.0]]).unwrap();

        assert!(m.stages[0].layers[0].weights.grad.iter().all(|&g| g == 0.0));
        assert!(m.stages[1].layers[0].weights.grad.iter().any(|&g| g != 0.0));

        let names: Vec<String> = m.trainable_params().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["block.0.weight", "block.0.bias", "block.1.weight", "block.1.bias"]);
    }

    #[test]
    fn replacing_head_resizes_and_keeps_backbone() {
        let mut m = model();
        let stem_before = m.stages[0].layers[0].weights.value.clone();
        m.freeze_all();
        m.replace_head(5, &mut StdRng::seed_from_u64(9));
        assert_eq!(m.num_classes(), 5);
        assert_eq!(m.head.input_size(), 3);
        assert!(m.head.is_trainable());
        assert_eq!(m.stages[0].layers[0].weights.value, stem_before);
        assert_eq!(m.architecture().num_classes, 5);
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let source = model();
        let mut target = StagedClassifier::from_spec(&spec(), &mut StdRng::seed_from_u64(99)).unwrap();
        target.restore(&source.snapshot()).unwrap();
        assert_eq!(target.snapshot(), source.snapshot());
        assert_eq!(source.snapshot().len(), 8);
    }

    #[test]
    fn restore_rejects_other_architectures() {
        let mut m = model();
        let mut other = model();
        other.replace_head(4, &mut StdRng::seed_from_u64(1));
        assert!(matches!(m.restore(&other.snapshot()), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn restore_rejects_data_that_disagrees_with_its_shape() {
        let mut m = model();
        let before = m.snapshot();
        let mut corrupt = before.clone();
        corrupt.insert("stem.0.weight", Matrix { rows: 3, cols: 4, data: vec![vec![0.5]] });
        assert!(matches!(m.restore(&corrupt), Err(Error::InvalidInput(_))));
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn parameter_count_includes_frozen_stages_and_head() {
        let mut m = model();
        // 3->4, 4->5, 5->3, head 3->2, weights plus biases.
        assert_eq!(m.parameter_count(), 16 + 25 + 18 + 8);
        m.freeze_all();
        assert_eq!(m.parameter_count(), 67);
    }

    #[test]
    fn wrong_input_width_is_rejected() {
        let mut m = model();
        assert!(m.forward(&[vec![1.0]], ForwardMode::Eval).is_err());
    }
}
