use serde::{Serialize, Deserialize};

use crate::math::matrix::Matrix;

/// A trainable tensor: its value, the gradient accumulated since the last
/// `zero_grad`, and whether gradients are computed for it at all.
///
/// Only `value` is persisted. A freshly deserialized parameter is frozen and
/// has an empty gradient buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub value: Matrix,
    #[serde(skip)]
    pub grad: Matrix,
    #[serde(skip)]
    pub trainable: bool,
}

impl Param {
    pub fn new(value: Matrix) -> Param {
        let grad = Matrix::zeros(value.rows, value.cols);
        Param { value, grad, trainable: true }
    }

    pub fn zero_grad(&mut self) {
        self.grad = Matrix::zeros(self.value.rows, self.value.cols);
    }

    /// Adds `g` into the gradient buffer, sizing the buffer on first use.
    pub fn accumulate(&mut self, g: &Matrix) {
        if !self.grad.same_shape(&self.value) {
            self.zero_grad();
        }
        self.grad.add_assign(g);
    }
}
