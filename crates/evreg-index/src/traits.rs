//! The [`RecordIndex`] trait and its lazy listing cursor.

use evreg_types::{Cid, Record};

use crate::error::IndexResult;
use crate::update::RecordUpdate;

/// Storage backend for registry records, keyed by CID.
///
/// The registry engine is the only writer. Implementations must make
/// [`merge`](RecordIndex::merge) atomic per key so a concurrent reader never
/// observes a half-applied update.
pub trait RecordIndex: Send + Sync {
    /// Insert or replace the record stored under `record.cid`.
    fn put(&self, record: &Record) -> IndexResult<()>;

    /// Returns `Ok(None)` if no record exists.
    fn get(&self, cid: &Cid) -> IndexResult<Option<Record>>;

    /// Read-modify-write of an existing record. Fails with
    /// [`IndexError::NotFound`](crate::IndexError::NotFound) when absent.
    fn merge(&self, cid: &Cid, update: &RecordUpdate) -> IndexResult<Record>;

    /// Remove a record. Administrative only; returns whether it existed.
    fn delete(&self, cid: &Cid) -> IndexResult<bool>;

    /// First record whose key sorts strictly after `after` (or the first
    /// record overall when `after` is `None`).
    fn record_after(&self, after: Option<&str>) -> IndexResult<Option<Record>>;

    /// Lazy cursor over all records in CID order.
    fn list(&self) -> Records<'_>;

    fn len(&self) -> IndexResult<usize>;

    fn is_empty(&self) -> IndexResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush pending writes to durable storage.
    fn flush(&self) -> IndexResult<()> {
        Ok(())
    }
}

/// Lazy, restartable listing of an index.
///
/// Each step re-reads the store for the record after the last yielded key, so
/// records written mid-iteration past the cursor are seen and nothing is
/// snapshotted. Calling [`RecordIndex::list`] again starts over.
pub struct Records<'a> {
    index: &'a dyn RecordIndex,
    last: Option<String>,
    done: bool,
}

impl<'a> Records<'a> {
    pub fn new(index: &'a dyn RecordIndex) -> Self {
        Self {
            index,
            last: None,
            done: false,
        }
    }
}

impl Iterator for Records<'_> {
    type Item = IndexResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.index.record_after(self.last.as_deref()) {
            Ok(Some(record)) => {
                self.last = Some(record.cid.as_str().to_string());
                Some(Ok(record))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
