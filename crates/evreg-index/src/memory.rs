use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use evreg_types::{Cid, Record};

use crate::error::{IndexError, IndexResult};
use crate::traits::{RecordIndex, Records};
use crate::update::RecordUpdate;

/// In-memory [`RecordIndex`] for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    records: RwLock<BTreeMap<String, Record>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordIndex for InMemoryIndex {
    fn put(&self, record: &Record) -> IndexResult<()> {
        let mut records = self.records.write().map_err(|_| IndexError::LockPoisoned)?;
        records.insert(record.cid.as_str().to_string(), record.clone());
        Ok(())
    }

    fn get(&self, cid: &Cid) -> IndexResult<Option<Record>> {
        let records = self.records.read().map_err(|_| IndexError::LockPoisoned)?;
        Ok(records.get(cid.as_str()).cloned())
    }

    fn merge(&self, cid: &Cid, update: &RecordUpdate) -> IndexResult<Record> {
        let mut records = self.records.write().map_err(|_| IndexError::LockPoisoned)?;
        let record = records
            .get_mut(cid.as_str())
            .ok_or_else(|| IndexError::NotFound(cid.clone()))?;
        update.apply_to(record);
        Ok(record.clone())
    }

    fn delete(&self, cid: &Cid) -> IndexResult<bool> {
        let mut records = self.records.write().map_err(|_| IndexError::LockPoisoned)?;
        Ok(records.remove(cid.as_str()).is_some())
    }

    fn record_after(&self, after: Option<&str>) -> IndexResult<Option<Record>> {
        let records = self.records.read().map_err(|_| IndexError::LockPoisoned)?;
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        Ok(records
            .range::<str, _>((lower, Bound::Unbounded))
            .next()
            .map(|(_, record)| record.clone()))
    }

    fn list(&self) -> Records<'_> {
        Records::new(self)
    }

    fn len(&self) -> IndexResult<usize> {
        let records = self.records.read().map_err(|_| IndexError::LockPoisoned)?;
        Ok(records.len())
    }
}
