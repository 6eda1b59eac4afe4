//! Snapshot storage for the call that must survive process teardown
//!
//! Snapshots are write-once/read-once: [`SnapshotStore::take`] consumes
//! the stored bytes. Encoding is MessagePack with a size bound.

use callbridge_api::{CallSnapshot, API_VERSION};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Error type for snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to access snapshot store: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode snapshot: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Snapshot is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Snapshot checksum mismatch for plugin {0}")]
    ChecksumMismatch(String),

    #[error("Snapshot api version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Snapshot store is read-only")]
    ReadOnly,
}

/// Encode a snapshot, enforcing the size bound
pub fn encode_snapshot(snapshot: &CallSnapshot, limit: usize) -> Result<Vec<u8>, SnapshotError> {
    let bytes = snapshot.to_bytes()?;
    if bytes.len() > limit {
        return Err(SnapshotError::TooLarge {
            size: bytes.len(),
            limit,
        });
    }
    Ok(bytes)
}

/// Decode a snapshot and check its version and checksum
pub fn decode_snapshot(bytes: &[u8]) -> Result<CallSnapshot, SnapshotError> {
    let snapshot = CallSnapshot::from_bytes(bytes)?;
    if snapshot.api_version != API_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            found: snapshot.api_version,
            expected: API_VERSION,
        });
    }
    if !snapshot.verify() {
        return Err(SnapshotError::ChecksumMismatch(snapshot.plugin_id));
    }
    Ok(snapshot)
}

/// Trait for snapshot storage
pub trait SnapshotStore: Send + Sync {
    /// Store bytes under a key, replacing any previous value
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), SnapshotError>;

    /// Remove and return the bytes stored under a key
    fn take(&self, key: &str) -> Result<Option<Vec<u8>>, SnapshotError>;

    /// Whether a snapshot is waiting under a key
    fn contains(&self, key: &str) -> Result<bool, SnapshotError>;
}

impl<T: SnapshotStore + ?Sized> SnapshotStore for Arc<T> {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), SnapshotError> {
        (**self).put(key, bytes)
    }

    fn take(&self, key: &str) -> Result<Option<Vec<u8>>, SnapshotError> {
        (**self).take(key)
    }

    fn contains(&self, key: &str) -> Result<bool, SnapshotError> {
        (**self).contains(key)
    }
}

// ============================================================================
// File-based Snapshot Store
// ============================================================================

/// One file per key under a directory
///
/// Default: `~/.config/<app>/snapshots/<key>.snapshot`
#[derive(Debug)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn default_for_app(app_name: &str) -> Self {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        Self::new(config_dir.join(app_name).join("snapshots"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.snapshot", file))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), SnapshotError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), bytes)?;
        Ok(())
    }

    fn take(&self, key: &str) -> Result<Option<Vec<u8>>, SnapshotError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(&path)?;
        Ok(Some(bytes))
    }

    fn contains(&self, key: &str) -> Result<bool, SnapshotError> {
        Ok(self.path_for(key).exists())
    }
}

// ============================================================================
// In-Memory Snapshot Store
// ============================================================================

/// In-memory store for tests and single-process hosts
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), SnapshotError> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes);
        Ok(())
    }

    fn take(&self, key: &str) -> Result<Option<Vec<u8>>, SnapshotError> {
        Ok(self
            .data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key))
    }

    fn contains(&self, key: &str) -> Result<bool, SnapshotError> {
        Ok(self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key))
    }
}

// ============================================================================
// Read-Only Snapshot Store
// ============================================================================

/// Wrapper that refuses writes
///
/// Useful when snapshots are provisioned out of band: `take` still
/// consumes from the inner store.
#[derive(Debug)]
pub struct ReadOnlySnapshotStore<S: SnapshotStore> {
    inner: S,
}

impl<S: SnapshotStore> ReadOnlySnapshotStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: SnapshotStore> SnapshotStore for ReadOnlySnapshotStore<S> {
    fn put(&self, _key: &str, _bytes: Vec<u8>) -> Result<(), SnapshotError> {
        Err(SnapshotError::ReadOnly)
    }

    fn take(&self, key: &str) -> Result<Option<Vec<u8>>, SnapshotError> {
        self.inner.take(key)
    }

    fn contains(&self, key: &str) -> Result<bool, SnapshotError> {
        self.inner.contains(key)
    }
}
