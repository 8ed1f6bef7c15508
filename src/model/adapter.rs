use rand::rngs::StdRng;

use crate::error::Result;
use crate::layers::param::Param;
use crate::model::snapshot::ParamSnapshot;

/// Whether a forward pass should keep what backprop needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Cache activations for a following `backward`.
    Train,
    /// Gradient-free; nothing is cached.
    Eval,
}

/// Mutable handle on one trainable parameter, tagged with its stable name.
pub struct ParamMut<'a> {
    pub name: String,
    pub param: &'a mut Param,
}

/// A pretrained backbone made of ordered stages plus a swappable linear
/// classification head.
///
/// The training core only ever talks to the model through this trait, so
/// any differentiable implementation can be plugged in.
pub trait ModelAdapter {
    /// Backbone stage names, input side first.
    fn stage_names(&self) -> Vec<String>;

    fn stage_count(&self) -> usize {
        self.stage_names().len()
    }

    /// Output width of the current head.
    fn num_classes(&self) -> usize;

    /// Disables gradients for every parameter, head included.
    fn freeze_all(&mut self);

    /// Enables gradients for one backbone stage. Returns `false` if the
    /// index does not name a stage.
    fn unfreeze_stage(&mut self, stage: usize) -> bool;

    /// Replaces the head with a freshly initialized, trainable linear layer.
    fn replace_head(&mut self, num_classes: usize, rng: &mut StdRng);

    /// Class scores (unnormalized) for each input.
    fn forward(&mut self, inputs: &[Vec<f64>], mode: ForwardMode) -> Result<Vec<Vec<f64>>>;

    /// Backpropagates ∂L/∂scores for the batch of the last `Train` forward,
    /// accumulating gradients into trainable parameters.
    fn backward(&mut self, score_grads: &[Vec<f64>]) -> Result<()>;

    fn zero_grad(&mut self);

    /// The parameters that currently have gradients enabled.
    fn trainable_params(&mut self) -> Vec<ParamMut<'_>>;

    /// Values of every parameter, frozen ones included.
    fn snapshot(&self) -> ParamSnapshot;

    /// Overwrites parameter values. The snapshot must match the
    /// architecture exactly.
    fn restore(&mut self, snapshot: &ParamSnapshot) -> Result<()>;
}
