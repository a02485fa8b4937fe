use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persisted record of which file contents have been fully indexed.
///
/// A flat JSON map of path to 16-hex content hash, written through on every
/// mutation so the record survives a crash mid-ingest.
pub struct FileHashRecords {
    path: PathBuf,
    map: Mutex<BTreeMap<String, String>>,
}

impl FileHashRecords {
    pub fn load(path: &Path) -> Result<Self> {
        let map = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(path)?).unwrap_or_default()
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            map: Mutex::new(map),
        })
    }

    /// Whether any indexed file currently carries `file_hash`.
    pub fn contains_hash(&self, file_hash: &str) -> bool {
        self.map
            .lock()
            .expect("file hashes poisoned")
            .values()
            .any(|h| h == file_hash)
    }

    /// Hash the given path was last indexed at, if any.
    pub fn hash_for(&self, path: &str) -> Option<String> {
        self.map
            .lock()
            .expect("file hashes poisoned")
            .get(path)
            .cloned()
    }

    pub fn record(&self, path: &str, file_hash: &str) -> Result<()> {
        let snapshot = {
            let mut map = self.map.lock().expect("file hashes poisoned");
            map.insert(path.to_string(), file_hash.to_string());
            map.clone()
        };
        self.persist(&snapshot)
    }

    pub fn remove(&self, path: &str) -> Result<()> {
        let snapshot = {
            let mut map = self.map.lock().expect("file hashes poisoned");
            map.remove(path);
            map.clone()
        };
        self.persist(&snapshot)
    }

    pub fn len(&self) -> usize {
        self.map.lock().expect("file hashes poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save(&self) -> Result<()> {
        let snapshot = self.map.lock().expect("file hashes poisoned").clone();
        self.persist(&snapshot)
    }

    fn persist(&self, map: &BTreeMap<String, String>) -> Result<()> {
        std::fs::write(&self.path, serde_json::to_vec_pretty(map)?)?;
        Ok(())
    }
}
