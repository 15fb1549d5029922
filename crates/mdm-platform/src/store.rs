//! Persisted key/value store interface.
//!
//! Values are strings grouped by namespace. Writes are expressed as a
//! [`WriteBatch`] that the store applies as one commit: either every
//! operation lands or none does.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;

/// A single queued write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Set `key` to `value`
    Set(String, String),
    /// Remove `key`
    Delete(String),
}

/// Ordered set of writes committed together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a set.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Set(key.into(), value.into()));
        self
    }

    /// Queue a delete.
    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete(key.into()));
        self
    }

    /// Queued operations in order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn apply_to(&self, entries: &mut BTreeMap<String, String>) {
        for op in &self.ops {
            match op {
                WriteOp::Set(k, v) => {
                    entries.insert(k.clone(), v.clone());
                }
                WriteOp::Delete(k) => {
                    entries.remove(k);
                }
            }
        }
    }
}

/// Namespaced string key/value store.
pub trait KeyValueStore: Send + Sync {
    /// Open the store.
    ///
    /// # Errors
    ///
    /// [`StoreError::NeedsErase`] when the medium is full or was written by an
    /// incompatible version; the caller erases and calls `init` again.
    fn init(&self) -> Result<(), StoreError>;

    /// Remove every namespace.
    ///
    /// # Errors
    ///
    /// Returns an error when the medium cannot be written.
    fn erase_all(&self) -> Result<(), StoreError>;

    /// Read one value.
    ///
    /// # Errors
    ///
    /// Returns an error when the medium cannot be read.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;

    /// Every key currently stored in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error when the medium cannot be read.
    fn keys(&self, namespace: &str) -> Result<Vec<String>, StoreError>;

    /// Apply `batch` to `namespace` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error when the commit fails; nothing is written in that
    /// case.
    fn commit(&self, namespace: &str, batch: &WriteBatch) -> Result<(), StoreError>;
}

type Namespaces = BTreeMap<String, BTreeMap<String, String>>;

/// In-memory store with fault injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Namespaces>,
    init_failures: Mutex<VecDeque<StoreError>>,
    reject_commits: Mutex<bool>,
    commits: Mutex<usize>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `entries` in `namespace`.
    pub fn with_entries<K, V>(namespace: &str, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        {
            let mut data = store.data.lock();
            let ns = data.entry(namespace.to_string()).or_default();
            for (k, v) in entries {
                ns.insert(k.into(), v.into());
            }
        }
        store
    }

    /// Make the next `init` calls fail with `errors`, in order.
    pub fn fail_init_with(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.init_failures.lock().extend(errors);
    }

    /// Reject every subsequent commit.
    pub fn reject_commits(&self, reject: bool) {
        *self.reject_commits.lock() = reject;
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> usize {
        *self.commits.lock()
    }

    /// Snapshot of `namespace`.
    pub fn snapshot(&self, namespace: &str) -> BTreeMap<String, String> {
        self.data.lock().get(namespace).cloned().unwrap_or_default()
    }
}

impl KeyValueStore for MemoryStore {
    fn init(&self) -> Result<(), StoreError> {
        match self.init_failures.lock().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn erase_all(&self) -> Result<(), StoreError> {
        self.data.lock().clear();
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .data
            .lock()
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .data
            .lock()
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn commit(&self, namespace: &str, batch: &WriteBatch) -> Result<(), StoreError> {
        if *self.reject_commits.lock() {
            return Err(StoreError::CommitRejected("injected".into()));
        }
        let mut data = self.data.lock();
        batch.apply_to(data.entry(namespace.to_string()).or_default());
        *self.commits.lock() += 1;
        Ok(())
    }
}

/// Store persisted as one JSON document.
///
/// Commits write a sibling temporary file and rename it over the original,
/// so a crash mid-commit leaves the previous contents intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<Option<Namespaces>>,
}

impl JsonFileStore {
    /// Store backed by `path`. Nothing is read until [`KeyValueStore::init`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Namespaces, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(Namespaces::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Namespaces::new()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    fn persist(&self, data: &Namespaces) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(data).map_err(|e| StoreError::Io(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|e| StoreError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::Io(e.to_string()))?;
        debug!(path = %self.path.display(), "store persisted");
        Ok(())
    }

    fn with_data<T>(&self, f: impl FnOnce(&Namespaces) -> T) -> Result<T, StoreError> {
        let mut cache = self.cache.lock();
        let data = match cache.take() {
            Some(d) => d,
            None => self.load()?,
        };
        let out = f(&data);
        *cache = Some(data);
        Ok(out)
    }
}

impl KeyValueStore for JsonFileStore {
    fn init(&self) -> Result<(), StoreError> {
        let data = self.load().map_err(|e| match e {
            StoreError::Corrupt(reason) => StoreError::NeedsErase(reason),
            other => other,
        })?;
        *self.cache.lock() = Some(data);
        Ok(())
    }

    fn erase_all(&self) -> Result<(), StoreError> {
        warn!(path = %self.path.display(), "erasing store");
        let empty = Namespaces::new();
        self.persist(&empty)?;
        *self.cache.lock() = Some(empty);
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        self.with_data(|d| d.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        self.with_data(|d| {
            d.get(namespace)
                .map(|ns| ns.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    fn commit(&self, namespace: &str, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut cache = self.cache.lock();
        let mut next = match cache.as_ref() {
            Some(d) => d.clone(),
            None => self.load()?,
        };
        batch.apply_to(next.entry(namespace.to_string()).or_default());
        self.persist(&next)?;
        *cache = Some(next);
        Ok(())
    }
}
