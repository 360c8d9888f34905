use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use evreg_crypto::ContentHasher;
use evreg_types::Cid;
use tracing::{debug, info, warn};

use crate::cache::ContentCache;
use crate::error::{with_timeout, SourceFailure, StoreError, StoreResult};
use crate::pinning::{PinMetadata, PinReceipt, PinningService};
use crate::source::ContentSource;

/// Default budget for a pin or add call.
pub const DEFAULT_PIN_TIMEOUT: Duration = Duration::from_secs(30);

/// The pinning authority and the local hasher disagree on a CID.
///
/// Non-fatal: the authority's identifier is kept as canonical and both
/// identifiers resolve to the same bytes locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CidMismatch {
    pub local: Cid,
    pub remote: Cid,
    /// Name of the service that issued `remote`.
    pub service: String,
}

/// Result of [`ContentAddressor::store`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreOutcome {
    /// Canonical identifier: the pinning service's when pinning succeeded,
    /// the local one otherwise.
    pub cid: Cid,
    /// Identifier computed locally from the bytes.
    pub local_cid: Cid,
    pub size: u64,
    pub pinned: bool,
    pub mismatch: Option<CidMismatch>,
}

/// Result of [`ContentAddressor::pin_existing`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinOutcome {
    pub receipt: PinReceipt,
    pub mismatch: Option<CidMismatch>,
}

/// Computes, stores, and resolves content by CID.
///
/// Storing pins through the configured service first and adopts its
/// identifier; the locally computed CID is the offline fallback. Resolving
/// walks the local cache and then each source in priority order, caching
/// whatever is found.
pub struct ContentAddressor {
    hasher: ContentHasher,
    cache: Arc<dyn ContentCache>,
    pinning: Option<Arc<dyn PinningService>>,
    pin_timeout: Duration,
    sources: Vec<(Arc<dyn ContentSource>, Duration)>,
}

impl ContentAddressor {
    pub fn new(hasher: ContentHasher, cache: Arc<dyn ContentCache>) -> Self {
        Self {
            hasher,
            cache,
            pinning: None,
            pin_timeout: DEFAULT_PIN_TIMEOUT,
            sources: Vec::new(),
        }
    }

    /// Use `service` as the store target whose identifiers are canonical.
    pub fn with_pinning(mut self, service: Arc<dyn PinningService>, timeout: Duration) -> Self {
        self.pinning = Some(service);
        self.pin_timeout = timeout;
        self
    }

    /// Append a fallback source. Sources are tried in insertion order.
    pub fn with_source(mut self, source: Arc<dyn ContentSource>, timeout: Duration) -> Self {
        self.sources.push((source, timeout));
        self
    }

    pub fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    pub fn pinning_service(&self) -> Option<&str> {
        self.pinning.as_ref().map(|p| p.name())
    }

    /// Names of the fallback sources in priority order.
    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|(s, _)| s.name().to_string())
            .collect()
    }

    /// Compute the local CID without storing anything.
    pub fn compute_cid(&self, data: &[u8]) -> Cid {
        self.hasher.cid(data)
    }

    /// Persist bytes and return their canonical identifier.
    pub async fn store(&self, data: &[u8], metadata: &PinMetadata) -> StoreResult<StoreOutcome> {
        let local = self.hasher.cid(data);
        let mut canonical = local.clone();
        let mut pinned = false;
        let mut mismatch = None;

        if let Some(service) = &self.pinning {
            match self.pin_with(service.as_ref(), data, metadata).await {
                Ok(receipt) => {
                    pinned = true;
                    if receipt.cid != local {
                        mismatch = Some(self.report_mismatch(&local, &receipt.cid, service.name()));
                    }
                    canonical = receipt.cid;
                }
                Err(e) => {
                    warn!(
                        service = service.name(),
                        cid = %local,
                        error = %e,
                        "pinning failed, falling back to local identifier"
                    );
                }
            }
        }

        self.cache.put(&canonical, data).await?;
        if canonical != local {
            self.cache.put(&local, data).await?;
        }
        info!(cid = %canonical, bytes = data.len(), pinned, "stored content");

        Ok(StoreOutcome {
            cid: canonical,
            local_cid: local,
            size: data.len() as u64,
            pinned,
            mismatch,
        })
    }

    /// Fetch the bytes for `cid` from the cache or the first source that has
    /// them.
    pub async fn resolve(&self, cid: &Cid) -> StoreResult<Bytes> {
        match self.cache.get(cid).await {
            Ok(Some(data)) => {
                debug!(cid = %cid, source = "cache", "resolved content");
                return Ok(data);
            }
            Ok(None) => {}
            Err(e) => warn!(cid = %cid, error = %e, "cache read failed"),
        }

        let mut failures = Vec::new();
        for (source, timeout) in &self.sources {
            let operation = format!("fetch from {}", source.name());
            match with_timeout(&operation, *timeout, source.fetch(cid)).await {
                Ok(Some(data)) => {
                    if let Err(e) = self.cache.put(cid, &data).await {
                        warn!(cid = %cid, error = %e, "could not cache fetched content");
                    }
                    info!(cid = %cid, source = source.name(), bytes = data.len(), "resolved content");
                    return Ok(data);
                }
                Ok(None) => {
                    debug!(cid = %cid, source = source.name(), "content not held by source");
                }
                Err(e) => {
                    warn!(cid = %cid, source = source.name(), error = %e, "content source failed");
                    failures.push(SourceFailure {
                        name: source.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Err(StoreError::NotFound(cid.clone()))
        } else {
            Err(StoreError::ContentUnavailable {
                cid: cid.clone(),
                failures,
            })
        }
    }

    /// Whether the bytes are held locally.
    pub async fn contains_local(&self, cid: &Cid) -> StoreResult<bool> {
        self.cache.contains(cid).await
    }

    /// Re-pin already stored content with the configured service.
    ///
    /// Reports a mismatch when the service assigns a different identifier
    /// than `cid`. Nothing is rewritten either way.
    pub async fn pin_existing(&self, cid: &Cid, metadata: &PinMetadata) -> StoreResult<PinOutcome> {
        let service = self
            .pinning
            .as_ref()
            .ok_or_else(|| StoreError::NotConfigured("pinning service".into()))?;
        let data = self.resolve(cid).await?;
        let receipt = self.pin_with(service.as_ref(), &data, metadata).await?;
        let mismatch = (receipt.cid != *cid)
            .then(|| self.report_mismatch(cid, &receipt.cid, service.name()));
        Ok(PinOutcome { receipt, mismatch })
    }

    async fn pin_with(
        &self,
        service: &dyn PinningService,
        data: &[u8],
        metadata: &PinMetadata,
    ) -> StoreResult<PinReceipt> {
        let operation = format!("pin via {}", service.name());
        with_timeout(&operation, self.pin_timeout, service.pin(data, metadata)).await
    }

    fn report_mismatch(&self, local: &Cid, remote: &Cid, service: &str) -> CidMismatch {
        warn!(
            local = %local,
            remote = %remote,
            service,
            "CID mismatch between local hasher and pinning service"
        );
        CidMismatch {
            local: local.clone(),
            remote: remote.clone(),
            service: service.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use async_trait::async_trait;
    use evreg_crypto::CidVersion;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pinning double that wraps content, so its CID never matches the local one.
    struct WrappingPin {
        calls: AtomicUsize,
        fail: bool,
    }

    impl WrappingPin {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl PinningService for WrappingPin {
        fn name(&self) -> &str {
            "wrapping"
        }

        async fn pin(&self, data: &[u8], _metadata: &PinMetadata) -> StoreResult<PinReceipt> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::Pinning {
                    service: "wrapping".into(),
                    reason: "down".into(),
                });
            }
            let mut wrapped = b"wrap:".to_vec();
            wrapped.extend_from_slice(data);
            Ok(PinReceipt {
                cid: ContentHasher::default().cid(&wrapped),
                size: data.len() as u64,
                timestamp: None,
            })
        }
    }

    struct StaticSource {
        name: &'static str,
        answer: Result<Option<&'static [u8]>, ()>,
        calls: AtomicUsize,
    }

    impl StaticSource {
        fn new(name: &'static str, answer: Result<Option<&'static [u8]>, ()>) -> Arc<Self> {
            Arc::new(Self {
                name,
                answer,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ContentSource for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _cid: &Cid) -> StoreResult<Option<Bytes>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answer {
                Ok(Some(data)) => Ok(Some(Bytes::from_static(data))),
                Ok(None) => Ok(None),
                Err(()) => Err(StoreError::Pinning {
                    service: self.name.into(),
                    reason: "unreachable".into(),
                }),
            }
        }
    }

    struct SlowSource;

    #[async_trait]
    impl ContentSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch(&self, _cid: &Cid) -> StoreResult<Option<Bytes>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
    }

    fn addressor() -> (ContentAddressor, Arc<InMemoryCache>) {
        let cache = Arc::new(InMemoryCache::new());
        (
            ContentAddressor::new(ContentHasher::default(), cache.clone()),
            cache,
        )
    }

    // --- store ---

    #[tokio::test]
    async fn store_without_pinning_uses_local_cid() {
        let (addr, cache) = addressor();
        let outcome = addr.store(b"payload", &PinMetadata::default()).await.unwrap();
        assert_eq!(outcome.cid, outcome.local_cid);
        assert!(!outcome.pinned);
        assert!(outcome.mismatch.is_none());
        assert_eq!(outcome.size, 7);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn store_adopts_pinned_cid_and_reports_mismatch() {
        let cache = Arc::new(InMemoryCache::new());
        let pin = Arc::new(WrappingPin::new(false));
        let addr = ContentAddressor::new(ContentHasher::default(), cache.clone())
            .with_pinning(pin.clone(), Duration::from_secs(1));

        let outcome = addr.store(b"payload", &PinMetadata::default()).await.unwrap();
        assert!(outcome.pinned);
        assert_ne!(outcome.cid, outcome.local_cid);
        let mismatch = outcome.mismatch.unwrap();
        assert_eq!(mismatch.remote, outcome.cid);
        assert_eq!(mismatch.local, outcome.local_cid);
        assert_eq!(mismatch.service, "wrapping");

        // Both identifiers resolve to the same bytes locally.
        assert_eq!(addr.resolve(&outcome.cid).await.unwrap(), &b"payload"[..]);
        assert_eq!(addr.resolve(&outcome.local_cid).await.unwrap(), &b"payload"[..]);
        assert_eq!(pin.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_falls_back_when_pinning_fails() {
        let cache = Arc::new(InMemoryCache::new());
        let addr = ContentAddressor::new(ContentHasher::default(), cache)
            .with_pinning(Arc::new(WrappingPin::new(true)), Duration::from_secs(1));

        let outcome = addr.store(b"offline", &PinMetadata::default()).await.unwrap();
        assert!(!outcome.pinned);
        assert_eq!(outcome.cid, ContentHasher::default().cid(b"offline"));
        assert!(outcome.mismatch.is_none());
    }

    #[tokio::test]
    async fn store_respects_cid_version() {
        let cache = Arc::new(InMemoryCache::new());
        let addr = ContentAddressor::new(ContentHasher::new(CidVersion::V1), cache);
        let outcome = addr.store(b"v1", &PinMetadata::default()).await.unwrap();
        assert_eq!(outcome.cid.version(), 1);
    }

    // --- resolve ---

    #[tokio::test]
    async fn resolve_tries_sources_in_order_and_caches() {
        let (addr, cache) = addressor();
        let first = StaticSource::new("first", Ok(None));
        let second = StaticSource::new("second", Ok(Some(b"found")));
        let third = StaticSource::new("third", Ok(Some(b"never")));
        let addr = addr
            .with_source(first.clone(), Duration::from_secs(1))
            .with_source(second.clone(), Duration::from_secs(1))
            .with_source(third.clone(), Duration::from_secs(1));
        let id = ContentHasher::default().cid(b"found");

        assert_eq!(addr.resolve(&id).await.unwrap(), &b"found"[..]);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
        assert_eq!(third.calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.len(), 1);

        // Second resolve is served from the cache.
        addr.resolve(&id).await.unwrap();
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolve_all_absent_is_not_found() {
        let (addr, _) = addressor();
        let addr = addr.with_source(StaticSource::new("a", Ok(None)), Duration::from_secs(1));
        let id = ContentHasher::default().cid(b"missing");
        assert!(matches!(addr.resolve(&id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn resolve_with_failures_is_unavailable() {
        let (addr, _) = addressor();
        let addr = addr
            .with_source(StaticSource::new("down", Err(())), Duration::from_secs(1))
            .with_source(StaticSource::new("empty", Ok(None)), Duration::from_secs(1));
        let id = ContentHasher::default().cid(b"missing");
        match addr.resolve(&id).await {
            Err(StoreError::ContentUnavailable { failures, .. }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].name, "down");
            }
            other => panic!("expected ContentUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_times_out_slow_sources() {
        let (addr, _) = addressor();
        let addr = addr
            .with_source(Arc::new(SlowSource), Duration::from_millis(20))
            .with_source(StaticSource::new("backup", Ok(Some(b"late"))), Duration::from_secs(1));
        let id = ContentHasher::default().cid(b"late");
        assert_eq!(addr.resolve(&id).await.unwrap(), &b"late"[..]);
    }

    // --- pin_existing ---

    #[tokio::test]
    async fn pin_existing_requires_pinning() {
        let (addr, _) = addressor();
        let outcome = addr.store(b"x", &PinMetadata::default()).await.unwrap();
        assert!(matches!(
            addr.pin_existing(&outcome.cid, &PinMetadata::default()).await,
            Err(StoreError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn pin_existing_reports_mismatch() {
        let cache = Arc::new(InMemoryCache::new());
        let seed = ContentAddressor::new(ContentHasher::default(), cache.clone());
        let stored = seed.store(b"repin", &PinMetadata::default()).await.unwrap();

        let addr = ContentAddressor::new(ContentHasher::default(), cache)
            .with_pinning(Arc::new(WrappingPin::new(false)), Duration::from_secs(1));
        let outcome = addr
            .pin_existing(&stored.cid, &PinMetadata::default())
            .await
            .unwrap();
        assert_eq!(outcome.mismatch.unwrap().local, stored.cid);
    }

    // --- properties ---

    proptest! {
        #[test]
        fn store_is_deterministic_and_round_trips(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let (addr, _) = addressor();
                let a = addr.store(&data, &PinMetadata::default()).await.unwrap();
                let b = addr.store(&data, &PinMetadata::default()).await.unwrap();
                assert_eq!(a.cid, b.cid);
                assert_eq!(addr.resolve(&a.cid).await.unwrap(), &data[..]);
            });
        }
    }
}
