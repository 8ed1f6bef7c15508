use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::{math::matrix::Matrix, activation::activation::ActivationFunction};
use crate::layers::param::Param;

/// Fully connected layer: `a = σ(x · W + b)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub weights: Param,
    pub biases: Param,
    pub activation: ActivationFunction,
}

/// Values a layer needs from its forward pass to run its backward pass.
#[derive(Debug, Clone)]
pub struct LayerTrace {
    pub input: Vec<f64>,
    /// Pre-activation `z = x · W + b`.
    pub pre: Vec<f64>,
}

impl Layer {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        size: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Layer {
        let weights = if activation.prefers_he_init() {
            Matrix::he(input_size, size, rng)
        } else {
            Matrix::xavier(input_size, size, rng)
        };
        Layer {
            weights: Param::new(weights),
            biases: Param::new(Matrix::zeros(1, size)),
            activation,
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.value.rows
    }

    pub fn size(&self) -> usize {
        self.weights.value.cols
    }

    pub fn is_trainable(&self) -> bool {
        self.weights.trainable
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.weights.trainable = trainable;
        self.biases.trainable = trainable;
    }

    /// Forward pass for one sample. Returns the trace and the activation.
    pub fn forward(&self, input: &[f64]) -> (LayerTrace, Vec<f64>) {
        let x = Matrix::row(input.to_vec());
        let mut z = &x * &self.weights.value;
        z.add_assign(&self.biases.value);
        let pre = z.data.swap_remove(0);
        let out = pre.iter().map(|&v| self.activation.function(v)).collect();
        (LayerTrace { input: input.to_vec(), pre }, out)
    }

    /// Backward pass for one sample.
    ///
    /// `delta` is ∂L/∂a for this layer's output. Gradients are accumulated
    /// only when the layer is trainable. When `propagate` is set, returns
    /// ∂L/∂x for the layer below.
    pub fn backward(&mut self, trace: &LayerTrace, delta: &[f64], propagate: bool) -> Option<Vec<f64>> {
        // δ = ∂L/∂a ⊙ σ'(z)
        let dz: Vec<f64> = delta.iter().zip(trace.pre.iter())
            .map(|(d, &z)| d * self.activation.derivative(z))
            .collect();
        let dz = Matrix::row(dz);

        if self.is_trainable() {
            let x_t = Matrix::row(trace.input.clone()).transpose();
            self.weights.accumulate(&(&x_t * &dz));
            self.biases.accumulate(&dz);
        }

        if propagate {
            let mut dx = &dz * &self.weights.value.transpose();
            Some(dx.data.swap_remove(0))
        } else {
            None
        }
    }

    pub fn zero_grad(&mut self) {
        self.weights.zero_grad();
        self.biases.zero_grad();
    }
}
