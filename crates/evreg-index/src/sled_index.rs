use std::path::Path;

use evreg_types::{Cid, Record};
use sled::IVec;
use tracing::{debug, info};

use crate::error::{IndexError, IndexResult};
use crate::traits::{RecordIndex, Records};
use crate::update::RecordUpdate;

const RECORDS_TREE: &str = "records";

/// Persistent [`RecordIndex`] backed by sled.
///
/// Records are JSON-encoded and keyed by the CID's string bytes, so sled's
/// key order is CID lexical order.
pub struct SledIndex {
    // Keeps the database open for as long as the tree is in use.
    _db: sled::Db,
    records: sled::Tree,
}

impl SledIndex {
    /// Open or create the index at `path`.
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        let records = db.open_tree(RECORDS_TREE)?;
        info!(path = %path.display(), records = records.len(), "opened record index");
        Ok(Self { _db: db, records })
    }

    /// Open a throwaway index that is removed when dropped.
    pub fn temporary() -> IndexResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let records = db.open_tree(RECORDS_TREE)?;
        Ok(Self { _db: db, records })
    }
}

fn encode(record: &Record) -> IndexResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| IndexError::Serialization(e.to_string()))
}

fn decode(key: &[u8], value: &[u8]) -> IndexResult<Record> {
    serde_json::from_slice(value).map_err(|e| IndexError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: e.to_string(),
    })
}

impl RecordIndex for SledIndex {
    fn put(&self, record: &Record) -> IndexResult<()> {
        self.records
            .insert(record.cid.as_str().as_bytes(), encode(record)?)?;
        debug!(cid = %record.cid, status = %record.status, "index record written");
        Ok(())
    }

    fn get(&self, cid: &Cid) -> IndexResult<Option<Record>> {
        let key = cid.as_str().as_bytes();
        match self.records.get(key)? {
            Some(value) => Ok(Some(decode(key, &value)?)),
            None => Ok(None),
        }
    }

    fn merge(&self, cid: &Cid, update: &RecordUpdate) -> IndexResult<Record> {
        let key = cid.as_str().as_bytes();
        loop {
            let current: IVec = self
                .records
                .get(key)?
                .ok_or_else(|| IndexError::NotFound(cid.clone()))?;
            let mut record = decode(key, &current)?;
            update.apply_to(&mut record);
            let next = encode(&record)?;
            match self.records.compare_and_swap(key, Some(&current), Some(next))? {
                Ok(()) => {
                    debug!(cid = %cid, status = %record.status, history = record.status_history.len(), "index record merged");
                    return Ok(record);
                }
                // Lost a race with another writer; re-read and retry.
                Err(_) => continue,
            }
        }
    }

    fn delete(&self, cid: &Cid) -> IndexResult<bool> {
        let existed = self.records.remove(cid.as_str().as_bytes())?.is_some();
        if existed {
            info!(cid = %cid, "index record deleted");
        }
        Ok(existed)
    }

    fn record_after(&self, after: Option<&str>) -> IndexResult<Option<Record>> {
        let entry = match after {
            Some(key) => self.records.get_gt(key.as_bytes())?,
            None => self.records.first()?,
        };
        entry.map(|(key, value)| decode(&key, &value)).transpose()
    }

    fn list(&self) -> Records<'_> {
        Records::new(self)
    }

    fn len(&self) -> IndexResult<usize> {
        Ok(self.records.len())
    }

    fn flush(&self) -> IndexResult<()> {
        self.records.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{record, rejected_change};
    use evreg_types::Status;

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record(b"persist");
        {
            let index = SledIndex::open(dir.path()).unwrap();
            index.put(&rec).unwrap();
            index
                .merge(&rec.cid, &RecordUpdate::status_change(rejected_change()))
                .unwrap();
            index.flush().unwrap();
        }
        let index = SledIndex::open(dir.path()).unwrap();
        let loaded = index.get(&rec.cid).unwrap().unwrap();
        assert_eq!(loaded.status, Status::Rejected);
        assert_eq!(loaded.status_history.len(), 2);
    }

    #[test]
    fn merge_missing_is_not_found() {
        let index = SledIndex::temporary().unwrap();
        let rec = record(b"absent");
        let err = index
            .merge(&rec.cid, &RecordUpdate::status_change(rejected_change()))
            .unwrap_err();
        assert!(matches!(err, IndexError::NotFound(_)));
    }

    #[test]
    fn concurrent_merges_lose_nothing() {
        let index = std::sync::Arc::new(SledIndex::temporary().unwrap());
        let rec = record(b"contended");
        index.put(&rec).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = index.clone();
                let cid = rec.cid.clone();
                std::thread::spawn(move || {
                    index
                        .merge(&cid, &RecordUpdate::status_change(rejected_change()))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let loaded = index.get(&rec.cid).unwrap().unwrap();
        assert_eq!(loaded.status_history.len(), 9);
    }

    #[test]
    fn list_walks_key_order() {
        let index = SledIndex::temporary().unwrap();
        for i in 0u8..10 {
            index.put(&record(&[i])).unwrap();
        }
        let cids: Vec<String> = index
            .list()
            .map(|r| r.unwrap().cid.as_str().to_string())
            .collect();
        assert_eq!(cids.len(), 10);
        assert!(cids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(index.len().unwrap(), 10);
    }

    #[test]
    fn corrupt_value_is_reported() {
        let index = SledIndex::temporary().unwrap();
        let rec = record(b"x");
        index
            .records
            .insert(rec.cid.as_str().as_bytes(), b"not json".to_vec())
            .unwrap();
        assert!(matches!(
            index.get(&rec.cid),
            Err(IndexError::Corrupt { .. })
        ));
        let mut cursor = index.list();
        assert!(cursor.next().unwrap().is_err());
        assert!(cursor.next().is_none());
    }
}
