//! Streaming client facade
//!
//! Owns the whole client stack (pool, pooled client, cache), listens for
//! configuration changes and swaps the pool in place without dropping
//! in-flight requests. This is the surface the WebDAV layer talks to.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::allocator::ProviderAllocator;
use crate::article_stream::ArticleStream;
use crate::client::ArticleStatus;
use crate::client::body::BodyStream;
use crate::client::cached::CachingClient;
use crate::client::factory::{ConnectionFactory, TcpConnectionFactory};
use crate::client::multi::{MultiClientOptions, MultiConnectionClient};
use crate::config::{ConfigChange, UsenetConfig};
use crate::constants::pool::EVENT_CHANNEL_CAPACITY;
use crate::error::NntpError;
use crate::pool::{ConnectionPool, PoolEvent};
use crate::protocol::SegmentHeader;
use crate::types::MessageId;

/// Result of probing an article set's availability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Every probed segment exists
    Healthy,
    /// At least one segment is missing
    Unhealthy,
}

/// High-level Usenet streaming client
///
/// Operations transparently lease pooled connections, retry transient
/// failures on fresh ones, and memoize small metadata lookups.
/// Utilization snapshots for the `usenet-connections` topic are
/// available via [`subscribe_pool_events`](Self::subscribe_pool_events)
/// and survive pool swaps.
pub struct UsenetStreamingClient {
    client: Arc<CachingClient>,
    factory: Arc<dyn ConnectionFactory>,
    events: broadcast::Sender<PoolEvent>,
}

impl std::fmt::Debug for UsenetStreamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsenetStreamingClient").finish_non_exhaustive()
    }
}

impl UsenetStreamingClient {
    /// Build the full stack against real TCP/TLS connections
    pub fn new(config: UsenetConfig) -> Result<Self, NntpError> {
        let factory: Arc<dyn ConnectionFactory> = Arc::new(TcpConnectionFactory::new()?);
        Ok(Self::with_factory(
            config,
            factory,
            MultiClientOptions::default(),
        ))
    }

    /// Build the stack over an arbitrary connection factory
    pub fn with_factory(
        config: UsenetConfig,
        factory: Arc<dyn ConnectionFactory>,
        options: MultiClientOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let allocator = ProviderAllocator::new(config.providers, Arc::clone(&factory));
        let pool = ConnectionPool::with_event_sender(allocator, events.clone());
        let multi = MultiConnectionClient::new(pool, options);
        Self {
            client: Arc::new(CachingClient::new(multi)),
            factory,
            events,
        }
    }

    /// Check whether an article exists
    pub async fn stat(&self, id: &MessageId) -> Result<ArticleStatus, NntpError> {
        self.client.stat(id).await
    }

    /// A provider's current date and time
    pub async fn date(&self) -> Result<String, NntpError> {
        self.client.date().await
    }

    /// A segment's yEnc header
    pub async fn segment_header(&self, id: &MessageId) -> Result<Arc<SegmentHeader>, NntpError> {
        self.client.segment_header(id).await
    }

    /// Total decoded size of the file an ordered segment list encodes
    pub async fn file_size(&self, segments: &[MessageId]) -> Result<u64, NntpError> {
        self.client.file_size(segments).await
    }

    /// Open one segment body as a byte stream
    pub async fn segment_stream(&self, id: &MessageId) -> Result<BodyStream, NntpError> {
        self.client.body(id).await
    }

    /// Open an ordered article set as one sequential byte stream
    pub fn open_article_stream(
        &self,
        segments: Vec<MessageId>,
        total_size: u64,
        prefetch: usize,
    ) -> ArticleStream {
        ArticleStream::new(Arc::clone(&self.client), segments, total_size, prefetch)
    }

    /// Verify end-to-end reachability by cycling one lease
    pub async fn wait_for_ready(&self) -> Result<(), NntpError> {
        self.client.wait_for_ready().await
    }

    /// Probe every segment in parallel; the first missing one wins
    ///
    /// Sibling probes are cancelled as soon as a negative result or an
    /// error comes back, releasing their leases.
    pub async fn check_health(&self, segments: &[MessageId]) -> Result<HealthStatus, NntpError> {
        let mut checks: FuturesUnordered<_> = segments
            .iter()
            .map(|id| {
                let client = Arc::clone(&self.client);
                let id = id.clone();
                async move { client.stat(&id).await }
            })
            .collect();

        while let Some(result) = checks.next().await {
            match result {
                Ok(ArticleStatus::Exists) => continue,
                Ok(ArticleStatus::Missing) => return Ok(HealthStatus::Unhealthy),
                Err(err) => return Err(err),
            }
        }
        Ok(HealthStatus::Healthy)
    }

    /// Subscribe to pool utilization snapshots
    ///
    /// Each snapshot formats as `live|max|idle` for the event bus.
    #[must_use]
    pub fn subscribe_pool_events(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Rebuild the pool from a new snapshot and swap it in
    ///
    /// In-flight requests finish on the old pool, which drains as their
    /// leases return. The metadata cache is untouched: entries are keyed
    /// by content-addressed message-ids.
    pub async fn apply_config(&self, snapshot: UsenetConfig) {
        info!(
            providers = snapshot.providers.len(),
            connections = snapshot.total_connections(),
            "rebuilding connection pool from new configuration"
        );
        let allocator = ProviderAllocator::new(snapshot.providers, Arc::clone(&self.factory));
        let pool = ConnectionPool::with_event_sender(allocator, self.events.clone());
        self.client.inner().update_pool(pool).await;
    }

    /// Consume configuration changes in a background task
    ///
    /// Only changes touching one of the `usenet.*` pool keys trigger a
    /// rebuild. The task ends when the config store closes the channel.
    pub fn watch_config(&self, mut changes: broadcast::Receiver<ConfigChange>) -> JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let factory = Arc::clone(&self.factory);
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if change.affects_pool() => {
                        info!("usenet configuration changed, swapping pool");
                        let allocator =
                            ProviderAllocator::new(change.snapshot.providers, Arc::clone(&factory));
                        let pool = ConnectionPool::with_event_sender(allocator, events.clone());
                        client.inner().update_pool(pool).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "config change stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Drain the pool and stop background drain tasks
    pub async fn close(&self) {
        self.client.inner().close().await;
    }

    /// Current pool utilization
    pub async fn pool_status(&self) -> PoolEvent {
        self.client.inner().current_pool().await.status()
    }
}
