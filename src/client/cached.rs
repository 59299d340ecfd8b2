//! Memoizing decorator for small metadata lookups
//!
//! Wraps the pooled client with a bounded in-memory cache keyed by
//! (operation, article id). NNTP articles are content-addressed by
//! message-id, so cached answers never go stale; negative stat results
//! are stable facts and are cached like positive ones. Errors are never
//! cached. Concurrent callers asking for the same key share a single
//! in-flight fetch.

use std::sync::Arc;

use moka::future::Cache;
use tracing::trace;

use crate::client::body::BodyStream;
use crate::client::multi::MultiConnectionClient;
use crate::client::ArticleStatus;
use crate::constants;
use crate::error::NntpError;
use crate::protocol::SegmentHeader;
use crate::types::MessageId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Stat(MessageId),
    Header(MessageId),
    /// Keyed by the set's first segment
    FileSize(MessageId),
    Date,
}

#[derive(Debug, Clone)]
enum CachedValue {
    Stat(ArticleStatus),
    Header(Arc<SegmentHeader>),
    FileSize(u64),
    Date(String),
}

/// Caching layer over [`MultiConnectionClient`]
///
/// Body streams are single-use and bypass the cache entirely.
pub struct CachingClient {
    inner: Arc<MultiConnectionClient>,
    cache: Cache<CacheKey, CachedValue>,
}

impl std::fmt::Debug for CachingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingClient")
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl CachingClient {
    pub fn new(inner: MultiConnectionClient) -> Self {
        Self::with_capacity(inner, constants::cache::MAX_ENTRIES)
    }

    pub fn with_capacity(inner: MultiConnectionClient, max_entries: u64) -> Self {
        Self {
            inner: Arc::new(inner),
            cache: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    /// The wrapped pooled client
    #[must_use]
    pub fn inner(&self) -> &Arc<MultiConnectionClient> {
        &self.inner
    }

    /// Memoized STAT; negative results are cached too
    pub async fn stat(&self, id: &MessageId) -> Result<ArticleStatus, NntpError> {
        let inner = Arc::clone(&self.inner);
        let fetch_id = id.clone();
        let value = self
            .cache
            .try_get_with(CacheKey::Stat(id.clone()), async move {
                trace!(id = %fetch_id, "stat cache miss");
                inner.stat(&fetch_id).await.map(CachedValue::Stat)
            })
            .await
            .map_err(shared_error)?;
        match value {
            CachedValue::Stat(status) => Ok(status),
            _ => unreachable!("stat key always maps to a stat value"),
        }
    }

    /// Memoized segment header lookup
    pub async fn segment_header(&self, id: &MessageId) -> Result<Arc<SegmentHeader>, NntpError> {
        let inner = Arc::clone(&self.inner);
        let fetch_id = id.clone();
        let value = self
            .cache
            .try_get_with(CacheKey::Header(id.clone()), async move {
                trace!(id = %fetch_id, "segment header cache miss");
                inner
                    .segment_header(&fetch_id)
                    .await
                    .map(|h| CachedValue::Header(Arc::new(h)))
            })
            .await
            .map_err(shared_error)?;
        match value {
            CachedValue::Header(header) => Ok(header),
            _ => unreachable!("header key always maps to a header value"),
        }
    }

    /// Memoized file size, keyed by the set's first segment
    pub async fn file_size(&self, segments: &[MessageId]) -> Result<u64, NntpError> {
        let first = segments
            .first()
            .ok_or_else(|| NntpError::Protocol("empty article set".to_string()))?;
        let inner = Arc::clone(&self.inner);
        let segments = segments.to_vec();
        let value = self
            .cache
            .try_get_with(CacheKey::FileSize(first.clone()), async move {
                inner.file_size(&segments).await.map(CachedValue::FileSize)
            })
            .await
            .map_err(shared_error)?;
        match value {
            CachedValue::FileSize(size) => Ok(size),
            _ => unreachable!("file-size key always maps to a file-size value"),
        }
    }

    /// Memoized server date
    pub async fn date(&self) -> Result<String, NntpError> {
        let inner = Arc::clone(&self.inner);
        let value = self
            .cache
            .try_get_with(CacheKey::Date, async move {
                inner.date().await.map(CachedValue::Date)
            })
            .await
            .map_err(shared_error)?;
        match value {
            CachedValue::Date(date) => Ok(date),
            _ => unreachable!("date key always maps to a date value"),
        }
    }

    /// Open a segment body; streams are single-use and never cached
    pub async fn body(&self, id: &MessageId) -> Result<BodyStream, NntpError> {
        self.inner.body(id).await
    }

    /// Cycle a lease to verify reachability
    pub async fn wait_for_ready(&self) -> Result<(), NntpError> {
        self.inner.wait_for_ready().await
    }

    /// Number of cached entries (pending maintenance flushed)
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

/// Unshare the error moka hands every coalesced waiter
fn shared_error(err: Arc<NntpError>) -> NntpError {
    (*err).clone()
}
