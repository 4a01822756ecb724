//! Second-tier storage for cached responses.
//!
//! The memory tier talks to its backing store only through [`CachePersister`],
//! so a failing disk never reaches the code that asked for a cached value.

use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure inside a cache backing store. Never escapes [`super::RequestCache`].
#[derive(Debug, thiserror::Error)]
pub enum CacheIoError {
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry is corrupt: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A cached payload with its creation time in unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub data: Value,
    pub created_at: i64,
}

/// Backing store addressed by cache key.
#[async_trait]
pub trait CachePersister: Send + Sync + Debug {
    async fn load(&self, key: &str) -> Result<Option<StoredEntry>, CacheIoError>;

    async fn store(&self, key: &str, entry: &StoredEntry) -> Result<(), CacheIoError>;

    async fn remove(&self, key: &str) -> Result<(), CacheIoError>;

    async fn clear(&self) -> Result<(), CacheIoError>;
}

/// Memory-only caching: nothing is stored, nothing is found.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPersister;

#[async_trait]
impl CachePersister for NullPersister {
    async fn load(&self, _key: &str) -> Result<Option<StoredEntry>, CacheIoError> {
        Ok(None)
    }

    async fn store(&self, _key: &str, _entry: &StoredEntry) -> Result<(), CacheIoError> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheIoError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheIoError> {
        Ok(())
    }
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct DiskPersister {
    dir: PathBuf,
}

impl DiskPersister {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl CachePersister for DiskPersister {
    async fn load(&self, key: &str) -> Result<Option<StoredEntry>, CacheIoError> {
        let bytes = match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn store(&self, key: &str, entry: &StoredEntry) -> Result<(), CacheIoError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec(entry)?;
        let path = self.entry_path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheIoError> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<(), CacheIoError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}
