//! Filesystem-backed object store.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

use super::ObjectStore;

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<String, StorageError> {
        let path = self.resolve(key)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        // Overwrite semantics: a retried job re-writes the same key.
        std::fs::write(&path, data).map_err(|e| StorageError::WriteObject {
            path: path.clone(),
            source: e,
        })?;

        log::debug!("Stored object {} ({} bytes)", key, data.len());
        Ok(path.display().to_string())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        std::fs::read(&path).map_err(|e| StorageError::ReadObject { path, source: e })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::raw_message_key;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());

        let address = store.put("inbox/raw/m1.eml", b"raw bytes").unwrap();
        assert!(address.contains("m1.eml"));
        assert_eq!(store.get("inbox/raw/m1.eml").unwrap(), b"raw bytes");
    }

    #[test]
    fn test_put_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        let key = raw_message_key("m1");

        store.put(&key, b"first").unwrap();
        store.put(&key, b"second").unwrap();

        assert_eq!(store.get(&key).unwrap(), b"second");
        // Still exactly one object under the raw prefix.
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("inbox/raw"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_get_missing_key_errors() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(matches!(
            store.get("inbox/raw/missing.eml"),
            Err(StorageError::ReadObject { .. })
        ));
    }

    #[test]
    fn test_traversal_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());

        for key in ["../escape", "/absolute", "a//b", "a/./b", "a/../b", ""] {
            assert!(
                matches!(store.put(key, b"x"), Err(StorageError::InvalidKey(_))),
                "key {:?} should be rejected",
                key
            );
        }
    }
}
