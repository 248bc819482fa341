//! Expand/collapse preferences per process group and per step.
//!
//! Keys are `group:{group_id}` and `step:{group_id}:{step_id}`. Group ids derive from the
//! first step's entry id, so choices survive reconnects and full reloads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use shared_types::LogType;

use crate::entry::LogTypeExt;

/// On-disk format version, bumped on incompatible layout changes.
const STORE_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("Preference store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable key → expanded flag storage.
pub trait PreferenceStore {
    fn get(&self, key: &str) -> Option<bool>;
    fn set(&mut self, key: &str, expanded: bool) -> Result<(), PrefsError>;
    fn remove(&mut self, key: &str) -> Result<(), PrefsError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<String, bool>,
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<bool> {
        self.values.get(key).copied()
    }

    fn set(&mut self, key: &str, expanded: bool) -> Result<(), PrefsError> {
        self.values.insert(key.to_string(), expanded);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PrefsError> {
        self.values.remove(key);
        Ok(())
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    expanded: BTreeMap<String, bool>,
}

/// JSON file store. Every write rewrites the file through a temporary sibling.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, bool>,
}

impl JsonFileStore {
    /// Open the store, starting empty when the file is missing or unreadable as JSON.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<StoreFile>(&raw) {
                Ok(file) if file.version == STORE_VERSION => file.expanded,
                Ok(file) => {
                    tracing::warn!(
                        path = %path.display(),
                        version = file.version,
                        "Ignoring preference store with unknown version"
                    );
                    BTreeMap::new()
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt preference store");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn flush(&self) -> Result<(), PrefsError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let payload = serde_json::to_string_pretty(&StoreFile {
            version: STORE_VERSION,
            expanded: self.values.clone(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<bool> {
        self.values.get(key).copied()
    }

    fn set(&mut self, key: &str, expanded: bool) -> Result<(), PrefsError> {
        if self.values.get(key) == Some(&expanded) {
            return Ok(());
        }
        self.values.insert(key.to_string(), expanded);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), PrefsError> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

pub fn group_key(group_id: &str) -> String {
    format!("group:{group_id}")
}

pub fn step_key(group_id: &str, step_id: &str) -> String {
    format!("step:{group_id}:{step_id}")
}

/// Typed expand/collapse view over a store, applying the defaults for unseen ids.
#[derive(Debug, Default)]
pub struct ExpansionPrefs<S> {
    store: S,
}

impl<S: PreferenceStore> ExpansionPrefs<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// New groups start collapsed.
    pub fn is_group_expanded(&self, group_id: &str) -> bool {
        self.store.get(&group_key(group_id)).unwrap_or(false)
    }

    /// New steps start collapsed unless their type auto-expands (warning, error).
    pub fn is_step_expanded(&self, group_id: &str, step_id: &str, entry_type: &LogType) -> bool {
        self.store
            .get(&step_key(group_id, step_id))
            .unwrap_or_else(|| entry_type.auto_expands())
    }

    pub fn set_group_expanded(&mut self, group_id: &str, expanded: bool) -> Result<(), PrefsError> {
        self.store.set(&group_key(group_id), expanded)
    }

    pub fn set_step_expanded(
        &mut self,
        group_id: &str,
        step_id: &str,
        expanded: bool,
    ) -> Result<(), PrefsError> {
        self.store.set(&step_key(group_id, step_id), expanded)
    }

    pub fn toggle_group(&mut self, group_id: &str) -> Result<bool, PrefsError> {
        let expanded = !self.is_group_expanded(group_id);
        self.set_group_expanded(group_id, expanded)?;
        Ok(expanded)
    }

    pub fn toggle_step(
        &mut self,
        group_id: &str,
        step_id: &str,
        entry_type: &LogType,
    ) -> Result<bool, PrefsError> {
        let expanded = !self.is_step_expanded(group_id, step_id, entry_type);
        self.set_step_expanded(group_id, step_id, expanded)?;
        Ok(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_collapse_everything_but_problems() {
        let prefs = ExpansionPrefs::new(MemoryStore::default());
        assert!(!prefs.is_group_expanded("pg-a1"));
        assert!(!prefs.is_step_expanded("pg-a1", "t1", &LogType::Tool));
        assert!(prefs.is_step_expanded("pg-a1", "w1", &LogType::Warning));
        assert!(prefs.is_step_expanded("pg-a1", "e1", &LogType::Error));
    }

    #[test]
    fn explicit_choice_overrides_default() {
        let mut prefs = ExpansionPrefs::new(MemoryStore::default());
        assert!(!prefs.toggle_step("pg-a1", "e1", &LogType::Error).unwrap());
        assert!(!prefs.is_step_expanded("pg-a1", "e1", &LogType::Error));
        assert!(prefs.toggle_group("pg-a1").unwrap());
        assert!(prefs.is_group_expanded("pg-a1"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let mut prefs = ExpansionPrefs::new(JsonFileStore::open(&path).unwrap());
        prefs.set_group_expanded("pg-a1", true).unwrap();
        prefs.set_step_expanded("pg-a1", "t1", true).unwrap();

        let reopened = ExpansionPrefs::new(JsonFileStore::open(&path).unwrap());
        assert!(reopened.is_group_expanded("pg-a1"));
        assert!(reopened.is_step_expanded("pg-a1", "t1", &LogType::Tool));
        assert_eq!(reopened.store().len(), 2);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.is_empty());
    }
}
