//! Error types for ferrite-finetune.

use thiserror::Error;

use crate::checkpoint::CheckpointTag;

fn tag_or_none(tag: &Option<CheckpointTag>) -> &'static str {
    tag.map_or("none", |t| t.as_str())
}

/// Every fatal condition the library can report.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed configuration or class data. Raised before any epoch runs.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Metrics requested over sequences of different lengths.
    #[error("Shape mismatch: {predictions} predictions vs {labels} labels")]
    ShapeMismatch { predictions: usize, labels: usize },

    /// Non-finite loss or gradient. Optimizing further is unsafe; resume
    /// from `last_good` instead.
    #[error(
        "Training diverged at epoch {epoch}, batch {batch}: {detail} (last good checkpoint: {})",
        tag_or_none(.last_good)
    )]
    TrainingDiverged {
        epoch: usize,
        batch: usize,
        detail: String,
        last_good: Option<CheckpointTag>,
    },

    /// `load` of a tag that was never saved in this store.
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// Any other failure raised while a run was in progress.
    #[error("Run aborted at epoch {epoch} (last good checkpoint: {}): {source}", tag_or_none(.last_good))]
    RunAborted {
        epoch: usize,
        last_good: Option<CheckpointTag>,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Image processing error: {0}")]
    Image(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

impl Error {
    /// The error underneath any `RunAborted` wrapping.
    pub fn root(&self) -> &Error {
        match self {
            Error::RunAborted { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diverged_names_last_good_checkpoint() {
        let err = Error::TrainingDiverged {
            epoch: 4,
            batch: 7,
            detail: "non-finite loss NaN".into(),
            last_good: Some(CheckpointTag::Best),
        };
        assert_eq!(
            err.to_string(),
            "Training diverged at epoch 4, batch 7: non-finite loss NaN (last good checkpoint: best)"
        );
    }

    #[test]
    fn root_unwraps_run_context() {
        let err = Error::RunAborted {
            epoch: 2,
            last_good: None,
            source: Box::new(Error::CheckpointNotFound("best".into())),
        };
        assert!(err.to_string().contains("last good checkpoint: none"));
        assert!(matches!(err.root(), Error::CheckpointNotFound(_)));
    }

    #[test]
    fn io_errors_convert() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
