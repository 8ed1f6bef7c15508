//! Adam with L2 weight decay folded into the gradient.

use std::collections::{HashMap, HashSet};

use crate::math::matrix::Matrix;
use crate::model::adapter::ParamMut;
use crate::optim::Optimizer;

/// Adam (Kingma & Ba) with bias-corrected moments.
///
/// Weight decay is classic L2: `g ← g + λ·θ` before the moment update.
/// Only parameters registered at construction are stepped; moment buffers
/// are keyed by parameter name.
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    weight_decay: f64,
    t: u64,
    params: HashSet<String>,
    m: HashMap<String, Matrix>,
    v: HashMap<String, Matrix>,
}

impl Adam {
    pub fn new<I, S>(lr: f64, weight_decay: f64, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay,
            t: 0,
            params: params.into_iter().map(Into::into).collect(),
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    pub fn step_count(&self) -> u64 {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [ParamMut<'_>]) {
        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias2 = 1.0 - self.beta2.powi(self.t as i32);

        for ParamMut { name, param } in params.iter_mut() {
            if !self.params.contains(name.as_str()) || !param.grad.same_shape(&param.value) {
                continue;
            }
            let (rows, cols) = (param.value.rows, param.value.cols);
            let m = self.m.entry(name.clone()).or_insert_with(|| Matrix::zeros(rows, cols));
            let v = self.v.entry(name.clone()).or_insert_with(|| Matrix::zeros(rows, cols));

            let value_rows = param.value.data.iter_mut();
            let grad_rows = param.grad.data.iter();
            for (((w_row, g_row), m_row), v_row) in value_rows.zip(grad_rows).zip(m.data.iter_mut()).zip(v.data.iter_mut()) {
                for (((w, g), m), v) in w_row.iter_mut().zip(g_row).zip(m_row.iter_mut()).zip(v_row.iter_mut()) {
                    let g = g + self.weight_decay * *w;
                    *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                    *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                    let m_hat = *m / bias1;
                    let v_hat = *v / bias2;
                    *w -= self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
                }
            }
        }
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::param::Param;
    use approx::assert_relative_eq;

    fn param(value: f64, grad: f64) -> Param {
        let mut p = Param::new(Matrix::from_data(vec![vec![value]]));
        p.grad = Matrix::from_data(vec![vec![grad]]);
        p
    }

    #[test]
    fn first_step_moves_by_learning_rate() {
        let mut p = param(1.0, 0.5);
        let mut adam = Adam::new(0.01, 0.0, ["w"]);
        adam.step(&mut [ParamMut { name: "w".into(), param: &mut p }]);
        // Bias-corrected first step is lr · sign(g).
        assert_relative_eq!(p.value.data[0][0], 0.99, epsilon = 1e-6);
        assert_eq!(adam.step_count(), 1);
    }

    #[test]
    fn weight_decay_pulls_toward_zero() {
        let mut p = param(2.0, 0.0);
        let mut adam = Adam::new(0.1, 0.1, ["w"]);
        adam.step(&mut [ParamMut { name: "w".into(), param: &mut p }]);
        assert!(p.value.data[0][0] < 2.0);
    }

    #[test]
    fn unregistered_params_are_untouched() {
        let mut p = param(1.0, 1.0);
        let mut adam = Adam::new(0.1, 0.0, ["other"]);
        adam.step(&mut [ParamMut { name: "w".into(), param: &mut p }]);
        assert_eq!(p.value.data[0][0], 1.0);
    }

    #[test]
    fn minimizes_a_quadratic() {
        let mut p = param(3.0, 0.0);
        let mut adam = Adam::new(0.1, 0.0, ["w"]);
        for _ in 0..500 {
            p.grad.data[0][0] = 2.0 * p.value.data[0][0];
            adam.step(&mut [ParamMut { name: "w".into(), param: &mut p }]);
        }
        assert!(p.value.data[0][0].abs() < 0.1);
    }
}
