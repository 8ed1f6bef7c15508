use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;

use crate::checkpoint::store::{CheckpointStore, DirCheckpointStore};
use crate::checkpoint::CheckpointTag;
use crate::error::{Error, Result};
use crate::loss::weighted_ce::softmax;
use crate::metrics::argmax;
use crate::model::adapter::ModelAdapter;
use crate::model::classifier::StagedClassifier;
use crate::model::labels::ClassLabelSpace;
use crate::model::manifest::ModelManifest;
use crate::model::snapshot::ParamSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassProbability {
    pub class: String,
    pub probability: f64,
}

/// Class probabilities, in label order, plus the winning class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub probabilities: Vec<ClassProbability>,
    pub verdict: String,
}

/// A trained model rebuilt from its manifest, ready to classify images.
///
/// Read-only after construction, so one instance can be shared between
/// request threads.
#[derive(Debug)]
pub struct Predictor {
    model: StagedClassifier,
    manifest: ModelManifest,
    tie_class: usize,
}

impl Predictor {
    /// Rebuilds the architecture described by `manifest` and loads `weights`
    /// into it. `tie_class` names the class that wins an exact probability
    /// tie; by default it is the last class.
    pub fn new(manifest: ModelManifest, weights: &ParamSnapshot, tie_class: Option<&str>) -> Result<Predictor> {
        manifest.validate()?;
        let tie_class = match tie_class {
            Some(name) => manifest.classes.index_of(name).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "tie class '{}' is not one of {:?}",
                    name,
                    manifest.classes.names()
                ))
            })?,
            None => manifest.classes.len() - 1,
        };

        // Every value is overwritten by `restore`; the seed only fills shapes.
        let mut model = StagedClassifier::from_spec(&manifest.architecture, &mut StdRng::seed_from_u64(0))?;
        model.restore(weights)?;
        if model.num_classes() != manifest.classes.len() {
            return Err(Error::InvalidInput(format!(
                "model head has {} outputs for {} classes",
                model.num_classes(),
                manifest.classes.len()
            )));
        }

        Ok(Predictor { model, manifest, tie_class })
    }

    /// Loads `<dir>/model.json` and the `tag` checkpoint next to it.
    pub fn load(dir: &Path, tag: CheckpointTag, tie_class: Option<&str>) -> Result<Predictor> {
        let store = DirCheckpointStore::open(dir)?;
        let manifest = store.load_manifest()?;
        let weights = store.load(tag)?;
        let predictor = Predictor::new(manifest, &weights, tie_class)?;
        info!(
            dir = %dir.display(),
            checkpoint = %tag,
            classes = ?predictor.classes().names(),
            "loaded model"
        );
        Ok(predictor)
    }

    pub fn classes(&self) -> &ClassLabelSpace {
        &self.manifest.classes
    }

    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    pub fn tie_class(&self) -> &str {
        self.classes().name(self.tie_class).unwrap_or_default()
    }

    pub fn model(&self) -> &StagedClassifier {
        &self.model
    }

    /// Classifies an already preprocessed input vector.
    pub fn predict_input(&self, input: &[f64]) -> Result<Prediction> {
        let probs = softmax(&self.model.predict_scores(input)?);
        let max = probs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let tied: Vec<usize> = (0..probs.len()).filter(|&i| probs[i] == max).collect();
        let winner = if tied.len() > 1 && tied.contains(&self.tie_class) {
            self.tie_class
        } else {
            tied.first().copied().unwrap_or(self.tie_class)
        };

        let classes = self.classes();
        Ok(Prediction {
            probabilities: probs.iter().enumerate().map(|(i, &p)| ClassProbability {
                class: classes.name(i).unwrap_or_default().to_owned(),
                probability: p,
            }).collect(),
            verdict: classes.name(winner).unwrap_or_default().to_owned(),
        })
    }

    /// Index of the most probable class for an already preprocessed input.
    /// Exact ties go to the lowest index, the rule validation scores with,
    /// not to the serving tie class.
    pub fn predict_class(&self, input: &[f64]) -> Result<usize> {
        Ok(argmax(&self.model.predict_scores(input)?))
    }

    /// Decodes an image, applies the training-time preprocessing, and
    /// classifies it.
    pub fn predict(&self, image_bytes: &[u8]) -> Result<Prediction> {
        let input = self.manifest.preprocessing.from_bytes(image_bytes)?;
        self.predict_input(&input)
    }
}
