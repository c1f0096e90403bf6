//! Legacy flat key-value storage.
//!
//! Before the record store existed, state was kept as plain strings under plain keys. Both implementations here only
//! matter to the one-time migration performed during bootstrap.
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;

use crate::error::Result;
use crate::error::StoreError;
use crate::traits::LegacyStore;

#[derive(Debug, Default)]
pub struct MemoryLegacyStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryLegacyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<K: ToString, V: ToString>(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            entries: Mutex::new(entries.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

impl LegacyStore for MemoryLegacyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Legacy entries kept as a single JSON object of strings.
///
/// The file is read once on construction and rewritten in full after every mutation. A missing file is an empty
/// store; once the last entry is removed the file is deleted.
#[derive(Debug)]
pub struct JsonFileLegacyStore {
    path:    PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileLegacyStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str::<BTreeMap<String, String>>(&content)?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(StoreError::from(err)),
        };
        debug!("Loaded {} legacy entries from {}", entries.len(), path.display());

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            return match fs::remove_file(&self.path) {
                Err(err) if err.kind() != ErrorKind::NotFound => Err(StoreError::from(err)),
                _ => Ok(()),
            };
        }

        // Write a sibling file first so a crash never leaves a truncated store behind.
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LegacyStore for JsonFileLegacyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}
