use async_trait::async_trait;
use bytes::Bytes;
use evreg_types::Cid;

use crate::error::StoreResult;

/// A place content can be fetched from on a cache miss.
///
/// Sources are tried in a fixed priority order. Each reports one of three
/// outcomes: the bytes, a definite absence (`Ok(None)`, e.g. HTTP 404), or a
/// failure. The distinction decides whether resolution ends in `NotFound` or
/// `ContentUnavailable`.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Short name used in logs and failure reports.
    fn name(&self) -> &str;

    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Bytes>>;
}
