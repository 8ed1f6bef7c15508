pub mod adam;
pub mod sgd;

pub use adam::Adam;
pub use sgd::Sgd;

use crate::config::{OptimizerKind, TrainConfig};
use crate::error::{Error, Result};
use crate::model::adapter::ParamMut;
use crate::train::schedule::TrainableSet;

/// Updates parameter values from their accumulated gradients.
pub trait Optimizer {
    /// One update. Parameters the optimizer was not built over are skipped.
    fn step(&mut self, params: &mut [ParamMut<'_>]);

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}

/// Builds the configured optimizer over exactly the parameters the
/// fine-tuning schedule made trainable.
pub fn build_optimizer(config: &TrainConfig, trainable: &TrainableSet) -> Result<Box<dyn Optimizer>> {
    if trainable.is_empty() {
        return Err(Error::InvalidInput("no trainable parameters to optimize".into()));
    }
    let names = trainable.names().iter().cloned();
    Ok(match config.optimizer {
        OptimizerKind::Adam => Box::new(Adam::new(config.learning_rate, config.weight_decay, names)),
        OptimizerKind::Sgd => Box::new(Sgd::new(config.learning_rate, config.weight_decay, names)),
    })
}
