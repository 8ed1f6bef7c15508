use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::data::preprocess::Preprocessing;
use crate::error::{Error, Result};
use crate::model::labels::ClassLabelSpace;
use crate::model::spec::BackboneSpec;

/// Everything a serving process needs besides the weights: the exact
/// architecture to rebuild, the class order of the head, and the input
/// transform the model was trained under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub architecture: BackboneSpec,
    pub classes: ClassLabelSpace,
    pub preprocessing: Preprocessing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ModelManifest {
    /// Checks that the pieces agree with each other.
    pub fn validate(&self) -> Result<()> {
        self.architecture.validate()?;
        self.preprocessing.validate()?;
        if self.architecture.num_classes != self.classes.len() {
            return Err(Error::InvalidInput(format!(
                "manifest head has {} outputs but {} classes are listed",
                self.architecture.num_classes,
                self.classes.len()
            )));
        }
        if self.architecture.input_size != self.preprocessing.input_len() {
            return Err(Error::InvalidInput(format!(
                "architecture expects {} inputs but preprocessing produces {}",
                self.architecture.input_size,
                self.preprocessing.input_len()
            )));
        }
        Ok(())
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<ModelManifest> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let manifest: ModelManifest = serde_json::from_reader(reader)?;
        manifest.validate()?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use crate::model::spec::{LayerSpec, StageSpec};

    fn manifest() -> ModelManifest {
        let preprocessing = Preprocessing { width: 2, height: 2, ..Preprocessing::default() };
        ModelManifest {
            architecture: BackboneSpec {
                name: "tiny".into(),
                input_size: preprocessing.input_len(),
                stages: vec![StageSpec {
                    name: "stem".into(),
                    layers: vec![LayerSpec { size: 4, activation: ActivationFunction::ReLU }],
                }],
                num_classes: 2,
            },
            classes: ClassLabelSpace::new(["ai", "real"]).unwrap(),
            preprocessing,
            description: None,
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        manifest().save_json(&path).unwrap();
        assert_eq!(ModelManifest::load_json(&path).unwrap(), manifest());
    }

    #[test]
    fn head_width_must_match_classes() {
        let mut m = manifest();
        m.architecture.num_classes = 3;
        assert!(matches!(m.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn input_width_must_match_preprocessing() {
        let mut m = manifest();
        m.preprocessing.width = 3;
        assert!(m.validate().is_err());
    }
}
