pub mod history;
pub mod store;

pub use history::{History, HistoryEntry};
pub use store::{CheckpointStore, DirCheckpointStore, MemoryCheckpointStore, StoreEvent};

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};

use crate::error::Error;

/// Role of a saved weight snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointTag {
    /// Highest validation accuracy so far; overwritten on every improvement.
    Best,
    /// Parameters when the run ended; written once.
    Final,
}

impl CheckpointTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointTag::Best => "best",
            CheckpointTag::Final => "final",
        }
    }
}

impl fmt::Display for CheckpointTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best" => Ok(CheckpointTag::Best),
            "final" => Ok(CheckpointTag::Final),
            other => Err(Error::InvalidInput(format!(
                "unknown checkpoint tag '{}' (expected 'best' or 'final')",
                other
            ))),
        }
    }
}
