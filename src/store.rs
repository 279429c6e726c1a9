//! Durable storage for vector indexes.
//!
//! Each logical key owns one slot on disk (`<root>/<key>/index.json`). Saving
//! overwrites the whole slot; the file is written to a temporary sibling and
//! renamed into place so readers never see a partial index.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::index::VectorIndex;

/// Default directory holding persisted indexes.
pub const DEFAULT_INDEX_DIR: &str = "vector_index";
/// Default logical key for the active document set.
pub const DEFAULT_INDEX_KEY: &str = "default";

const INDEX_FILE: &str = "index.json";

/// Failures while reading or writing an index slot.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Keys are restricted to `[A-Za-z0-9_-]`.
    #[error("invalid index key {0:?}: use letters, digits, '-' or '_'")]
    InvalidKey(String),
    /// Filesystem failure.
    #[error("index storage I/O failed at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The index could not be serialized.
    #[error("failed to encode index: {0}")]
    Encode(#[source] serde_json::Error),
    /// The slot exists but does not hold a readable index.
    #[error("index at {path} is corrupt: {source}")]
    Corrupt {
        /// Offending file.
        path: PathBuf,
        /// Decoder error.
        source: serde_json::Error,
    },
}

/// Directory-backed key/value slots for [`VectorIndex`] values.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    /// Uses `root` as the storage directory; it is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File that backs `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key).join(INDEX_FILE))
    }

    /// True when an index has been saved under `key`.
    pub fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.path_for(key)?.is_file())
    }

    /// Writes `index` under `key`, replacing whatever was there.
    pub fn save(&self, index: &VectorIndex, key: &str) -> Result<PathBuf, StoreError> {
        let path = self.path_for(key)?;
        let dir = self.root.join(key);
        fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;

        let tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|source| io_error(&dir, source))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, index).map_err(StoreError::Encode)?;
            writer.flush().map_err(|source| io_error(&path, source))?;
        }
        tmp.persist(&path)
            .map_err(|err| io_error(&path, err.error))?;
        debug!(path = %path.display(), entries = index.len(), "saved vector index");
        Ok(path)
    }

    /// Reads the index saved under `key`, or `None` when the slot is empty.
    pub fn load(&self, key: &str) -> Result<Option<VectorIndex>, StoreError> {
        let path = self.path_for(key)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(&path, source)),
        };
        let index = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;
        Ok(Some(index))
    }

    /// Deletes the slot for `key`. Returns whether anything was removed.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        let dir = self.root.join(key);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(io_error(&dir, source)),
        }
    }
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_DIR)
    }
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexEntry, VectorIndex};

    fn sample(texts: &[&str]) -> VectorIndex {
        let entries = texts
            .iter()
            .enumerate()
            .map(|(id, text)| IndexEntry {
                id,
                text: text.to_string(),
                embedding: vec![id as f32, 1.0],
            })
            .collect();
        VectorIndex::from_entries("test-model", entries).expect("valid entries")
    }

    #[test]
    fn missing_slot_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        assert!(store.load("default").unwrap().is_none());
        assert!(!store.exists("default").unwrap());
    }

    #[test]
    fn save_overwrites_previous_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample(&["old a", "old b", "old c"]), "default").unwrap();
        store.save(&sample(&["new"]), "default").unwrap();

        let loaded = store.load("default").unwrap().expect("index present");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries()[0].text, "new");
        assert_eq!(loaded, sample(&["new"]));
    }

    #[test]
    fn keys_are_isolated_and_removable() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample(&["a"]), "one").unwrap();
        store.save(&sample(&["b"]), "two").unwrap();
        assert!(store.remove("one").unwrap());
        assert!(!store.remove("one").unwrap());
        assert!(store.load("one").unwrap().is_none());
        assert_eq!(store.load("two").unwrap().unwrap().entries()[0].text, "b");
    }

    #[test]
    fn rejects_path_like_keys() {
        let store = IndexStore::new("unused");
        for key in ["", "../escape", "a/b", "space key"] {
            assert!(matches!(store.path_for(key), Err(StoreError::InvalidKey(_))));
        }
    }

    #[test]
    fn corrupt_slot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let path = store.path_for("default").unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(store.load("default"), Err(StoreError::Corrupt { .. })));
    }
}
