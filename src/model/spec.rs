use std::collections::HashSet;
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};

/// One dense layer inside a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub size: usize,
    pub activation: ActivationFunction,
}

/// A named group of layers that is frozen or unfrozen as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub layers: Vec<LayerSpec>,
}

/// Architecture of a backbone-plus-linear-head classifier, without weights.
///
/// Saved in the model manifest so a serving process can rebuild the exact
/// network before loading a checkpoint into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackboneSpec {
    pub name: String,
    /// Length of the flattened input vector.
    pub input_size: usize,
    /// Ordered input → output.
    pub stages: Vec<StageSpec>,
    /// Width of the classification head.
    pub num_classes: usize,
}

pub const HEAD_NAME: &str = "head";

impl BackboneSpec {
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(Error::InvalidInput("backbone input_size must be positive".into()));
        }
        if self.num_classes == 0 {
            return Err(Error::InvalidInput("backbone num_classes must be positive".into()));
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.is_empty() || stage.name == HEAD_NAME || stage.name.contains('.') {
                return Err(Error::InvalidInput(format!("invalid stage name '{}'", stage.name)));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(Error::InvalidInput(format!("duplicate stage name '{}'", stage.name)));
            }
            if stage.layers.is_empty() {
                return Err(Error::InvalidInput(format!("stage '{}' has no layers", stage.name)));
            }
            if stage.layers.iter().any(|l| l.size == 0) {
                return Err(Error::InvalidInput(format!("stage '{}' has a zero-width layer", stage.name)));
            }
        }
        Ok(())
    }

    /// Width of the features the head consumes.
    pub fn feature_size(&self) -> usize {
        self.stages.iter()
            .flat_map(|s| s.layers.last())
            .last()
            .map(|l| l.size)
            .unwrap_or(self.input_size)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<BackboneSpec> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
