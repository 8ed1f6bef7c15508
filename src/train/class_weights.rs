use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};

/// Per-class loss weights, normalized to sum to 1.
///
/// `weight[c] = (1 / count[c]) / Σ (1 / count[c'])`, so rarer classes weigh
/// more. Computed once from the training split and fixed for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    weights: Vec<f64>,
}

impl ClassWeights {
    pub fn compute(class_counts: &[usize]) -> Result<ClassWeights> {
        if class_counts.is_empty() {
            return Err(Error::InvalidInput("class counts are empty".into()));
        }
        if let Some(class) = class_counts.iter().position(|&c| c == 0) {
            return Err(Error::InvalidInput(format!(
                "class {} has no training examples; its weight would be undefined",
                class
            )));
        }
        let inverse: Vec<f64> = class_counts.iter().map(|&c| 1.0 / c as f64).collect();
        let total: f64 = inverse.iter().sum();
        Ok(ClassWeights {
            weights: inverse.into_iter().map(|w| w / total).collect(),
        })
    }

    /// Equal weights; the loss then reduces to plain cross-entropy.
    pub fn uniform(num_classes: usize) -> Result<ClassWeights> {
        if num_classes == 0 {
            return Err(Error::InvalidInput("cannot weight zero classes".into()));
        }
        Ok(ClassWeights { weights: vec![1.0 / num_classes as f64; num_classes] })
    }

    pub fn get(&self, class: usize) -> Option<f64> {
        self.weights.get(class).copied()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}
