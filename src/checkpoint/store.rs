use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::checkpoint::history::{History, HistoryEntry};
use crate::checkpoint::CheckpointTag;
use crate::error::{Error, Result};
use crate::model::manifest::ModelManifest;
use crate::model::snapshot::ParamSnapshot;

/// Durable home of a run's weight snapshots and accuracy history.
///
/// A single writer (the orchestrator) uses it during a run. History is
/// buffered and only written on `flush_history`.
pub trait CheckpointStore {
    /// Stores `params` under `tag`, replacing any earlier snapshot. The
    /// snapshot is fully written when this returns.
    fn save(&mut self, tag: CheckpointTag, params: &ParamSnapshot) -> Result<()>;

    /// Fails with `CheckpointNotFound` if `tag` was never saved here.
    fn load(&self, tag: CheckpointTag) -> Result<ParamSnapshot>;

    fn append_history(&mut self, entry: HistoryEntry);

    fn flush_history(&mut self) -> Result<()>;

    /// Entries appended so far, flushed or not.
    fn history(&self) -> &History;
}

pub const MANIFEST_FILE: &str = "model.json";
pub const HISTORY_FILE: &str = "history.json";

/// Writes `value` to a sibling temp file and renames it over `path`, so a
/// reader never sees a half-written file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T, pretty: bool) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = fs::File::create(&tmp)?;
    let mut writer = BufWriter::new(file);
    if pretty {
        serde_json::to_writer_pretty(&mut writer, value)?;
    } else {
        serde_json::to_writer(&mut writer, value)?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);

    fs::rename(&tmp, path)?;
    Ok(())
}

/// A directory holding `<tag>.weights.json`, `history.json`, and the
/// `model.json` manifest.
#[derive(Debug)]
pub struct DirCheckpointStore {
    dir: PathBuf,
    history: History,
}

impl DirCheckpointStore {
    /// Opens `dir` for writing, creating it if needed.
    pub fn create(dir: &Path) -> Result<DirCheckpointStore> {
        fs::create_dir_all(dir)?;
        Ok(DirCheckpointStore { dir: dir.to_path_buf(), history: History::new() })
    }

    /// Opens an existing run directory, loading its history if present.
    pub fn open(dir: &Path) -> Result<DirCheckpointStore> {
        if !dir.is_dir() {
            return Err(Error::InvalidInput(format!("{} is not a directory", dir.display())));
        }
        let history_path = dir.join(HISTORY_FILE);
        let history = if history_path.exists() {
            History::load_json(&history_path)?
        } else {
            History::new()
        };
        Ok(DirCheckpointStore { dir: dir.to_path_buf(), history })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn weights_path(&self, tag: CheckpointTag) -> PathBuf {
        self.dir.join(format!("{}.weights.json", tag.as_str()))
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        manifest.validate()?;
        write_json_atomic(&self.manifest_path(), manifest, true)
    }

    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let path = self.manifest_path();
        if !path.exists() {
            return Err(Error::InvalidInput(format!("no model manifest at {}", path.display())));
        }
        ModelManifest::load_json(&path)
    }
}

impl CheckpointStore for DirCheckpointStore {
    fn save(&mut self, tag: CheckpointTag, params: &ParamSnapshot) -> Result<()> {
        let path = self.weights_path(tag);
        params.save_json(&path)?;
        debug!(tag = %tag, path = %path.display(), params = params.len(), "saved checkpoint");
        Ok(())
    }

    fn load(&self, tag: CheckpointTag) -> Result<ParamSnapshot> {
        let path = self.weights_path(tag);
        if !path.is_file() {
            return Err(Error::CheckpointNotFound(format!("{} (looked for {})", tag, path.display())));
        }
        ParamSnapshot::load_json(&path)
    }

    fn append_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    fn flush_history(&mut self) -> Result<()> {
        let path = self.history_path();
        write_json_atomic(&path, &self.history, true)?;
        debug!(path = %path.display(), epochs = self.history.len(), "wrote history");
        Ok(())
    }

    fn history(&self) -> &History {
        &self.history
    }
}

/// What a `MemoryCheckpointStore` was asked to do, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Saved(CheckpointTag),
    /// History flushed with this many entries.
    HistoryFlushed(usize),
}

/// Keeps snapshots in memory and records every write.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    snapshots: HashMap<CheckpointTag, ParamSnapshot>,
    history: History,
    flushed: Option<History>,
    events: Vec<StoreEvent>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[StoreEvent] {
        &self.events
    }

    /// How many times `tag` was saved.
    pub fn save_count(&self, tag: CheckpointTag) -> usize {
        self.events.iter().filter(|e| **e == StoreEvent::Saved(tag)).count()
    }

    /// History as of the last flush.
    pub fn flushed_history(&self) -> Option<&History> {
        self.flushed.as_ref()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&mut self, tag: CheckpointTag, params: &ParamSnapshot) -> Result<()> {
        self.snapshots.insert(tag, params.clone());
        self.events.push(StoreEvent::Saved(tag));
        Ok(())
    }

    fn load(&self, tag: CheckpointTag) -> Result<ParamSnapshot> {
        self.snapshots
            .get(&tag)
            .cloned()
            .ok_or_else(|| Error::CheckpointNotFound(tag.to_string()))
    }

    fn append_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    fn flush_history(&mut self) -> Result<()> {
        self.flushed = Some(self.history.clone());
        self.events.push(StoreEvent::HistoryFlushed(self.history.len()));
        Ok(())
    }

    fn history(&self) -> &History {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::matrix::Matrix;

    fn snapshot(v: f64) -> ParamSnapshot {
        let mut s = ParamSnapshot::new();
        s.insert("head.weight", Matrix::from_data(vec![vec![v, -v], vec![0.1 * v, 3.0]]));
        s.insert("head.bias", Matrix::row(vec![v / 3.0, 1e-300]));
        s
    }

    #[test]
    fn memory_store_records_order() {
        let mut store = MemoryCheckpointStore::new();
        store.save(CheckpointTag::Best, &snapshot(1.0)).unwrap();
        store.save(CheckpointTag::Best, &snapshot(2.0)).unwrap();
        store.append_history(HistoryEntry { train_accuracy: 0.1, validation_accuracy: 0.2 });
        store.flush_history().unwrap();
        assert_eq!(store.save_count(CheckpointTag::Best), 2);
        assert_eq!(store.load(CheckpointTag::Best).unwrap(), snapshot(2.0));
        assert!(matches!(store.load(CheckpointTag::Final), Err(Error::CheckpointNotFound(_))));
        assert_eq!(store.events().last(), Some(&StoreEvent::HistoryFlushed(1)));
    }

    #[test]
    fn dir_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirCheckpointStore::create(dir.path()).unwrap();
        store.save(CheckpointTag::Final, &snapshot(0.7)).unwrap();
        store.flush_history().unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path()).unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["final.weights.json", "history.json"]);
    }

    #[test]
    fn reopened_store_sees_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirCheckpointStore::create(dir.path()).unwrap();
        store.append_history(HistoryEntry { train_accuracy: 0.9, validation_accuracy: 0.8 });
        store.flush_history().unwrap();

        let reopened = DirCheckpointStore::open(dir.path()).unwrap();
        assert_eq!(reopened.history().len(), 1);
    }
}
