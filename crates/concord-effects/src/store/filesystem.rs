//! Filesystem-backed durable store
//!
//! One file per key under a base directory. Writes go to a temp file in the
//! same directory and are renamed into place, so readers never observe a
//! half-written value.

use concord_core::{DurableStore, StoreError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

const MAX_KEY_LEN: usize = 255;

/// Durable store that keeps each key in its own file
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    /// Open (and create if needed) a store rooted at `base_path`
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).map_err(|e| {
            StoreError::unavailable(format!(
                "failed to create store directory {}: {e}",
                base_path.display()
            ))
        })?;
        info!(path = %base_path.display(), "opened filesystem store");
        Ok(Self { base_path })
    }

    /// Directory holding the stored files
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(StoreError::unavailable(format!(
                "invalid key length {}",
                key.len()
            )));
        }
        // Reject anything that could escape the base directory.
        if key.contains("..") || key.contains('\0') || key.contains('/') || key.contains('\\') {
            return Err(StoreError::unavailable(format!("invalid key {key:?}")));
        }
        Ok(self.base_path.join(key))
    }
}

impl DurableStore for FilesystemStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.key_path(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        let temp = self
            .base_path
            .join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()));

        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp, &path)
        };

        if let Err(e) = write() {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        debug!(key, bytes = value.len(), "stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FilesystemStore::new(dir.path()).unwrap();
            store.set("auth", r#"{"a":1}"#).unwrap();
        }
        let store = FilesystemStore::new(dir.path()).unwrap();
        assert_eq!(store.get("auth").unwrap().as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn missing_key_reads_none_and_removes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path()).unwrap();
        assert_eq!(store.get("absent").unwrap(), None);
        store.remove("absent").unwrap();
    }

    #[test]
    fn overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path()).unwrap();
        store.set("auth", "one").unwrap();
        store.set("auth", "two").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("auth")]);
        assert_eq!(store.get("auth").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn path_traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path()).unwrap();
        assert!(store.set("../escape", "x").is_err());
        assert!(store.get("a/b").is_err());
        assert!(store.get("").is_err());
    }
}
