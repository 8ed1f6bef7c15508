use std::collections::BTreeMap;
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::checkpoint::store::write_json_atomic;
use crate::error::Result;
use crate::math::matrix::Matrix;

/// Named parameter values captured at one point in time.
///
/// Names are ordered, so two snapshots of the same model serialize to the
/// same layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSnapshot {
    params: BTreeMap<String, Matrix>,
}

impl ParamSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Matrix) {
        self.params.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Matrix> {
        self.params.get(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Matrix)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Compact JSON, written through a temp file and renamed into place.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self, false)
    }

    pub fn load_json(path: &Path) -> Result<ParamSnapshot> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
