use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use evreg_types::Cid;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Local content cache keyed by CID.
///
/// Entries are immutable: a CID always maps to the same bytes, so `put` of an
/// existing key is a no-op.
#[async_trait]
pub trait ContentCache: Send + Sync {
    /// Read cached bytes. `Ok(None)` on a miss.
    async fn get(&self, cid: &Cid) -> StoreResult<Option<Bytes>>;

    /// Cache bytes under `cid`. Idempotent.
    async fn put(&self, cid: &Cid, data: &[u8]) -> StoreResult<()>;

    async fn contains(&self, cid: &Cid) -> StoreResult<bool>;

    /// Drop a cached entry. Returns `true` if it existed.
    async fn remove(&self, cid: &Cid) -> StoreResult<bool>;
}

/// Filesystem cache: one file per CID inside a single directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a partially written file.
pub struct FsCache {
    dir: PathBuf,
    tmp_seq: AtomicU64,
}

impl FsCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            tmp_seq: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, cid: &Cid) -> PathBuf {
        // CID text forms are base58 or base32, both safe as file names.
        self.dir.join(cid.as_str())
    }
}

#[async_trait]
impl ContentCache for FsCache {
    async fn get(&self, cid: &Cid) -> StoreResult<Option<Bytes>> {
        match tokio::fs::read(self.path_for(cid)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn put(&self, cid: &Cid, data: &[u8]) -> StoreResult<()> {
        let target = self.path_for(cid);
        if tokio::fs::try_exists(&target).await? {
            return Ok(());
        }
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!(".{}.{}.{seq}.tmp", cid.as_str(), std::process::id()));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Io(e));
        }
        debug!(cid = %cid, bytes = data.len(), "cached content on disk");
        Ok(())
    }

    async fn contains(&self, cid: &Cid) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(cid)).await?)
    }

    async fn remove(&self, cid: &Cid) -> StoreResult<bool> {
        match tokio::fs::remove_file(self.path_for(cid)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// In-memory cache for tests and embedding.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<Cid, Bytes>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentCache for InMemoryCache {
    async fn get(&self, cid: &Cid) -> StoreResult<Option<Bytes>> {
        let map = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.get(cid).cloned())
    }

    async fn put(&self, cid: &Cid, data: &[u8]) -> StoreResult<()> {
        let mut map = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        map.entry(cid.clone())
            .or_insert_with(|| Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn contains(&self, cid: &Cid) -> StoreResult<bool> {
        let map = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.contains_key(cid))
    }

    async fn remove(&self, cid: &Cid) -> StoreResult<bool> {
        let mut map = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.remove(cid).is_some())
    }
}
