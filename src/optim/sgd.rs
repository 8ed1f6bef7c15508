use std::collections::HashSet;

use crate::model::adapter::ParamMut;
use crate::optim::Optimizer;

/// Plain stochastic gradient descent: `θ ← θ − lr · (g + λ·θ)`.
pub struct Sgd {
    pub learning_rate: f64,
    pub weight_decay: f64,
    params: HashSet<String>,
}

impl Sgd {
    pub fn new<I, S>(learning_rate: f64, weight_decay: f64, params: I) -> Sgd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Sgd {
            learning_rate,
            weight_decay,
            params: params.into_iter().map(Into::into).collect(),
        }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [ParamMut<'_>]) {
        for ParamMut { name, param } in params.iter_mut() {
            if !self.params.contains(name.as_str()) || !param.grad.same_shape(&param.value) {
                continue;
            }
            for (w_row, g_row) in param.value.data.iter_mut().zip(param.grad.data.iter()) {
                for (w, g) in w_row.iter_mut().zip(g_row) {
                    *w -= self.learning_rate * (g + self.weight_decay * *w);
                }
            }
        }
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}
