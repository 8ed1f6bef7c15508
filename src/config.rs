//! Immutable run configuration.
//!
//! `TrainConfig` is everything the orchestrator reads; it is passed by value
//! into `Orchestrator::new` and never changes afterwards. `RunConfig` is the
//! TOML document the command-line tool loads.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Serialize, Deserialize};

use crate::data::augment::AugmentationPolicy;
use crate::data::preprocess::Preprocessing;
use crate::error::{Error, Result};
use crate::model::spec::BackboneSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

/// Reduce-on-plateau settings, watching validation accuracy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    /// Non-improving epochs tolerated before a reduction.
    pub patience: usize,
    /// Multiplier applied to the learning rate on a reduction.
    pub factor: f64,
    /// Relative margin an observation must beat the best by.
    pub threshold: f64,
    pub min_lr: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        PlateauConfig { patience: 2, factor: 0.5, threshold: 1e-4, min_lr: 0.0 }
    }
}

/// Hyperparameters of one fine-tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub batch_size: usize,
    /// Epoch budget; early stopping may end the run sooner.
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub optimizer: OptimizerKind,
    /// Non-improving epochs tolerated before the run stops.
    pub early_stopping_patience: usize,
    /// `None` keeps the learning rate constant. Omitting the table from a
    /// config file also means `None`, whatever the preset.
    #[serde(default)]
    pub plateau: Option<PlateauConfig>,
    /// How many backbone stages, counted from the output side, are trained.
    pub trainable_stages: usize,
    /// Weight the loss by inverse class frequency.
    pub class_weighting: bool,
    pub seed: u64,
}

impl TrainConfig {
    /// Short run that only adapts the last stage. No class weighting, no
    /// learning-rate schedule.
    pub fn light() -> TrainConfig {
        TrainConfig {
            batch_size: 16,
            epochs: 12,
            learning_rate: 3e-4,
            weight_decay: 1e-4,
            optimizer: OptimizerKind::Adam,
            early_stopping_patience: 3,
            plateau: None,
            trainable_stages: 1,
            class_weighting: false,
            seed: 42,
        }
    }

    /// Longer run over the last two stages with class weighting and a
    /// plateau schedule.
    pub fn balanced() -> TrainConfig {
        TrainConfig {
            batch_size: 32,
            epochs: 25,
            learning_rate: 1e-4,
            weight_decay: 1e-4,
            optimizer: OptimizerKind::Adam,
            early_stopping_patience: 5,
            plateau: Some(PlateauConfig::default()),
            trainable_stages: 2,
            class_weighting: true,
            seed: 42,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be positive".into()));
        }
        if self.epochs == 0 {
            return Err(Error::InvalidInput("epochs must be positive".into()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(Error::InvalidInput(format!("learning_rate {} must be positive", self.learning_rate)));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(Error::InvalidInput(format!("weight_decay {} must be non-negative", self.weight_decay)));
        }
        if self.early_stopping_patience == 0 {
            return Err(Error::InvalidInput("early_stopping_patience must be positive".into()));
        }
        if let Some(plateau) = &self.plateau {
            if !(plateau.factor > 0.0 && plateau.factor < 1.0) {
                return Err(Error::InvalidInput(format!("plateau factor {} must be in (0, 1)", plateau.factor)));
            }
            if !plateau.threshold.is_finite() || plateau.threshold < 0.0 {
                return Err(Error::InvalidInput(format!("plateau threshold {} must be non-negative", plateau.threshold)));
            }
            if !plateau.min_lr.is_finite() || plateau.min_lr < 0.0 {
                return Err(Error::InvalidInput(format!("plateau min_lr {} must be non-negative", plateau.min_lr)));
            }
        }
        Ok(())
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig::balanced()
    }
}

/// Where the image folders live and how they are turned into inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub root: PathBuf,
    pub train_dir: String,
    pub val_dir: String,
    /// Applied to the training split only.
    pub augmentation: AugmentationPolicy,
    pub preprocessing: Preprocessing,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            root: PathBuf::from("data"),
            train_dir: "train".into(),
            val_dir: "val".into(),
            augmentation: AugmentationPolicy::Strong,
            preprocessing: Preprocessing::default(),
        }
    }
}

impl DataConfig {
    pub fn train_path(&self) -> PathBuf {
        self.root.join(&self.train_dir)
    }

    pub fn val_path(&self) -> PathBuf {
        self.root.join(&self.val_dir)
    }
}

/// The starting network: a saved pretrained model, or an architecture to
/// initialize from scratch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub pretrained: Option<PathBuf>,
    pub architecture: Option<BackboneSpec>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig { dir: PathBuf::from("checkpoints") }
    }
}

/// Top-level TOML document read by `ferrite-finetune train`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub training: TrainConfig,
    pub data: DataConfig,
    pub model: ModelConfig,
    pub output: OutputConfig,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<RunConfig> {
        let config: RunConfig = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.training.validate()?;
        self.data.preprocessing.validate()?;
        match (&self.model.pretrained, &self.model.architecture) {
            (Some(_), Some(_)) => Err(Error::Config(
                "[model] sets both `pretrained` and `architecture`; pick one".into(),
            )),
            (None, None) => Err(Error::Config(
                "[model] needs either `pretrained` or `architecture`".into(),
            )),
            (None, Some(arch)) => arch.validate(),
            (Some(_), None) => Ok(()),
        }
    }
}

pub fn load_toml<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn presets_are_valid() {
        assert!(TrainConfig::light().validate().is_ok());
        assert!(TrainConfig::balanced().validate().is_ok());
        assert_eq!(TrainConfig::default(), TrainConfig::balanced());
    }

    #[test]
    fn bad_values_fail_fast() {
        let mut c = TrainConfig::light();
        c.batch_size = 0;
        assert!(matches!(c.validate(), Err(Error::InvalidInput(_))));

        let mut c = TrainConfig::balanced();
        c.plateau = Some(PlateauConfig { factor: 1.5, ..PlateauConfig::default() });
        assert!(c.validate().is_err());

        let mut c = TrainConfig::light();
        c.learning_rate = f64::NAN;
        assert!(c.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[training]
epochs = 3
plateau = {{ patience = 1 }}

[data]
root = "images"
augmentation = "light"

[model]
pretrained = "backbone.json"
"#
        )
        .unwrap();

        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.batch_size, 32);
        let plateau = config.training.plateau.unwrap();
        assert_eq!(plateau.patience, 1);
        assert_eq!(plateau.factor, 0.5);
        assert_eq!(config.data.augmentation, AugmentationPolicy::Light);
        assert_eq!(config.data.train_path(), PathBuf::from("images/train"));
        assert_eq!(config.output.dir, PathBuf::from("checkpoints"));
    }

    #[test]
    fn model_source_is_required() {
        let config = RunConfig::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let missing = Path::new("/definitely/not/here.toml");
        assert!(matches!(load_toml::<RunConfig>(missing), Err(Error::Config(_))));
    }
}
