//! Pluggable storage capability (spec §9): `read`/`write`/`list`/`remove`
//! by path. Grounded on the teacher's `Database`/`Tree` trait pair
//! (`examples/BTCDecoded-reference-node/src/storage/database.rs`), which
//! abstracts over `sled`/`redb` behind the same kind of byte-oriented
//! interface; here the wire format is page files rather than a K/V
//! store, so the two concrete backends are a filesystem tree and an
//! in-memory map instead of sled/redb.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("storage io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Byte-oriented storage keyed by slash-separated path. Both a
/// filesystem and an in-memory implementation must be provided.
pub trait StreamStore: Send + Sync {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
    fn remove(&self, path: &str) -> Result<(), StorageError>;
}

/// Stores every path under a base directory on disk. Writes are
/// crash-atomic: content lands in a sibling `.tmp` file and is renamed
/// into place.
pub struct FilesystemStore {
    base_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.base_dir.join(path)
    }

    fn io_err(path: &str, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.to_string(),
            source,
        }
    }
}

impl StreamStore for FilesystemStore {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let full = self.resolve(path);
        match std::fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(path, e)),
        }
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Self::io_err(path, e))?;
        }
        let tmp = full.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(|e| Self::io_err(path, e))?;
        std::fs::rename(&tmp, &full).map_err(|e| Self::io_err(path, e))?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.resolve(prefix);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(prefix, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_err(prefix, e))?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(".tmp") {
                    names.push(format!("{prefix}/{name}"));
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path);
        match std::fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(path, e)),
        }
    }
}

/// Process-local in-memory store, used by tests and ephemeral clients.
#[derive(Default)]
pub struct InMemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamStore for InMemoryStore {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().unwrap().get(path).cloned())
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.data
            .write()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().unwrap();
        let mut names: Vec<String> = data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        self.data.write().unwrap().remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn StreamStore) {
        assert_eq!(store.read("a/b").unwrap(), None);
        store.write("a/b", b"hello").unwrap();
        assert_eq!(store.read("a/b").unwrap(), Some(b"hello".to_vec()));
        store.write("a/c", b"world").unwrap();
        let mut listed = store.list("a").unwrap();
        listed.sort();
        assert_eq!(listed, vec!["a/b".to_string(), "a/c".to_string()]);
        store.remove("a/b").unwrap();
        assert_eq!(store.read("a/b").unwrap(), None);
    }

    #[test]
    fn in_memory_store_behaves() {
        exercise(&InMemoryStore::new());
    }

    #[test]
    fn filesystem_store_behaves() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FilesystemStore::new(dir.path()));
    }

    #[test]
    fn filesystem_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FilesystemStore::new(dir.path());
            store.write("x", b"durable").unwrap();
        }
        let reopened = FilesystemStore::new(dir.path());
        assert_eq!(reopened.read("x").unwrap(), Some(b"durable".to_vec()));
    }
}
