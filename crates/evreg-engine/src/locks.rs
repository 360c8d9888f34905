use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use evreg_types::Cid;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per CID.
///
/// Everything that mutates a record, from the ledger write through the index
/// merge, runs under that record's guard. Waiters are served first come,
/// first served, so index history for a CID is written in the same order
/// its ledger confirmations arrive.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<Cid, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, cid: &Cid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on are dropped.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(cid.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of CIDs with a live guard or waiter.
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.values().filter(|lock| Arc::strong_count(lock) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evreg_crypto::ContentHasher;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let cid = ContentHasher::default().cid(b"k");
        let guard = locks.lock(&cid).await;

        let waiter = {
            let locks = locks.clone();
            let cid = cid.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&cid).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let hasher = ContentHasher::default();
        let _a = locks.lock(&hasher.cid(b"a")).await;
        let _b = locks.lock(&hasher.cid(b"b")).await;
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = KeyedLocks::new();
        let hasher = ContentHasher::default();
        drop(locks.lock(&hasher.cid(b"a")).await);
        let _b = locks.lock(&hasher.cid(b"b")).await;
        assert_eq!(locks.active(), 1);
    }
}
