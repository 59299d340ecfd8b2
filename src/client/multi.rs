//! Pooled NNTP client with fault isolation per operation
//!
//! Implements the same surface as a single connection, but every
//! operation leases from the pool and applies the retry/replace
//! protocol: a retryable failure marks the lease for replacement and the
//! operation runs once more on a fresh connection; terminal failures
//! propagate untouched. Stream-returning operations hand the lease to a
//! background drain task so the caller gets its bytes while the
//! connection finishes the server response at network speed.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::body::BodyStream;
use crate::client::{ArticleStatus, NntpConnection};
use crate::constants;
use crate::error::NntpError;
use crate::pool::{ConnectionPool, Lease};
use crate::protocol::SegmentHeader;
use crate::types::MessageId;

/// Tuning knobs for the pooled client
#[derive(Debug, Clone)]
pub struct MultiClientOptions {
    /// How long a connection may keep draining after its result was
    /// delivered before it is replaced instead of recycled
    pub readiness_timeout: Duration,
}

impl Default for MultiClientOptions {
    fn default() -> Self {
        Self {
            readiness_timeout: constants::pool::READINESS_TIMEOUT,
        }
    }
}

/// Client that multiplexes operations over the connection pool
pub struct MultiConnectionClient {
    pool: RwLock<Arc<ConnectionPool>>,
    options: MultiClientOptions,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for MultiConnectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiConnectionClient").finish_non_exhaustive()
    }
}

impl MultiConnectionClient {
    pub fn new(pool: ConnectionPool, options: MultiClientOptions) -> Self {
        Self {
            pool: RwLock::new(Arc::new(pool)),
            options,
            shutdown: CancellationToken::new(),
        }
    }

    /// The pool operations currently lease from
    pub async fn current_pool(&self) -> Arc<ConnectionPool> {
        Arc::clone(&*self.pool.read().await)
    }

    /// Atomically swap in a new pool and drain the old one
    ///
    /// In-flight operations keep their reference to the old pool and
    /// complete normally; the old pool stops handing out connections and
    /// disposes each one as its lease returns.
    pub async fn update_pool(&self, new_pool: ConnectionPool) {
        let old = {
            let mut guard = self.pool.write().await;
            std::mem::replace(&mut *guard, Arc::new(new_pool))
        };
        debug!("connection pool swapped, draining previous pool");
        old.close().await;
    }

    /// Verify end-to-end reachability by cycling a lease
    pub async fn wait_for_ready(&self) -> Result<(), NntpError> {
        let _lease = self.lease().await?;
        Ok(())
    }

    /// Acquire from the current pool, following swaps
    ///
    /// A waiter queued on a pool that is closed mid-wait retries on
    /// whatever pool replaced it, so reconfiguration never fails an
    /// in-flight request.
    async fn lease(&self) -> Result<Lease, NntpError> {
        loop {
            let pool = self.current_pool().await;
            match pool.acquire().await {
                Ok(lease) => return Ok(lease),
                Err(err) => {
                    if pool.is_closed() && !self.shutdown.is_cancelled() {
                        let current = self.current_pool().await;
                        if !Arc::ptr_eq(&current, &pool) {
                            continue;
                        }
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Stop background drain tasks and drain the pool
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.current_pool().await.close().await;
    }

    /// Check whether an article exists on any leased connection
    pub async fn stat(&self, id: &MessageId) -> Result<ArticleStatus, NntpError> {
        let id = id.clone();
        self.with_connection(move |conn| {
            let id = id.clone();
            Box::pin(async move { conn.stat(&id).await })
        })
        .await
    }

    /// Ask a provider for its current date and time
    pub async fn date(&self) -> Result<String, NntpError> {
        self.with_connection(|conn| Box::pin(conn.date())).await
    }

    /// Fetch a segment's yEnc header
    pub async fn segment_header(&self, id: &MessageId) -> Result<SegmentHeader, NntpError> {
        let id = id.clone();
        self.with_connection(move |conn| {
            let id = id.clone();
            Box::pin(async move { conn.fetch_segment_header(&id).await })
        })
        .await
    }

    /// Total decoded size of the file an ordered segment list encodes
    pub async fn file_size(&self, segments: &[MessageId]) -> Result<u64, NntpError> {
        let first = segments
            .first()
            .ok_or_else(|| NntpError::Protocol("empty article set".to_string()))?;
        Ok(self.segment_header(first).await?.file_size)
    }

    /// Open a segment body as a byte stream
    ///
    /// The result is returned as soon as the server accepts the BODY
    /// command; the connection keeps draining in the background and is
    /// recycled once idle, or replaced if draining exceeds the readiness
    /// timeout or the consumer goes away mid-body.
    pub async fn body(&self, id: &MessageId) -> Result<BodyStream, NntpError> {
        let mut last = None;
        for attempt in 0..2 {
            let mut lease = self.lease().await?;
            match lease.connection().begin_body(id).await {
                Ok(()) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    self.spawn_readiness_drain(lease, tx);
                    return Ok(BodyStream::new(rx));
                }
                Err(err) if err.is_retryable() && attempt == 0 => {
                    warn!(id = %id, "body open failed, retrying on a fresh connection: {err}");
                    lease.replace();
                    last = Some(err);
                }
                Err(err) => {
                    if err.is_retryable() {
                        lease.replace();
                    }
                    return Err(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| NntpError::Protocol("retry exhausted".to_string())))
    }

    /// Forward body chunks to the consumer, then release the lease
    ///
    /// The task holds only a child of the client's shutdown token, so
    /// the caller's own completion never aborts the cleanup. Whatever
    /// goes wrong here, the connection is never recycled un-ready: any
    /// non-clean outcome marks the lease for replacement.
    fn spawn_readiness_drain(
        &self,
        mut lease: Lease,
        tx: mpsc::UnboundedSender<Result<Bytes, NntpError>>,
    ) {
        let cancel = self.shutdown.child_token();
        let readiness_timeout = self.options.readiness_timeout;
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(NntpError::Cancelled),
                drained = tokio::time::timeout(
                    readiness_timeout,
                    forward_body(lease.connection(), &tx),
                ) => match drained {
                    Ok(result) => result,
                    Err(_) => Err(NntpError::Timeout),
                },
            };

            if let Err(err) = outcome {
                debug!("replacing connection after incomplete drain: {err}");
                lease.replace();
                let _ = tx.send(Err(err));
            }
            drop(lease);
        });
    }

    /// Run an operation with retry-once-on-replace semantics
    async fn with_connection<T, F>(&self, op: F) -> Result<T, NntpError>
    where
        F: for<'c> Fn(&'c mut NntpConnection) -> BoxFuture<'c, Result<T, NntpError>>,
    {
        let mut last = None;
        for attempt in 0..2 {
            let mut lease = self.lease().await?;
            match op(lease.connection()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt == 0 => {
                    warn!("operation failed, retrying on a fresh connection: {err}");
                    lease.replace();
                    last = Some(err);
                }
                Err(err) => {
                    if err.is_retryable() {
                        lease.replace();
                    }
                    return Err(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| NntpError::Protocol("retry exhausted".to_string())))
    }
}

async fn forward_body(
    conn: &mut NntpConnection,
    tx: &mpsc::UnboundedSender<Result<Bytes, NntpError>>,
) -> Result<(), NntpError> {
    loop {
        match conn.read_body_line().await? {
            Some(chunk) => {
                if tx.send(Ok(chunk)).is_err() {
                    // consumer dropped the stream mid-body
                    return Err(NntpError::Cancelled);
                }
            }
            None => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ProviderAllocator;
    use crate::client::factory::ConnectionFactory;
    use crate::config::ProviderConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;

    /// Hands each new connection the next script from a list
    struct ScriptedFactory {
        scripts: Mutex<Vec<&'static [u8]>>,
        connects: AtomicUsize,
    }

    impl ScriptedFactory {
        fn new(scripts: Vec<&'static [u8]>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts),
                connects: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ConnectionFactory for ScriptedFactory {
        async fn connect(&self, provider: &ProviderConfig) -> Result<NntpConnection, NntpError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let script = {
                let mut scripts = self.scripts.lock().unwrap();
                if scripts.is_empty() {
                    return Err(NntpError::CannotConnect {
                        provider: provider.display_name(),
                        reason: "no script left".to_string(),
                    });
                }
                scripts.remove(0)
            };
            let (client, mut server) = tokio::io::duplex(8192);
            tokio::spawn(async move {
                server.write_all(b"200 hi\r\n").await.unwrap();
                server.write_all(script).await.unwrap();
                std::mem::forget(server);
            });
            NntpConnection::establish(client, provider.display_name(), "", "").await
        }
    }

    fn client_from(factory: Arc<ScriptedFactory>, cap: usize) -> MultiConnectionClient {
        let providers = vec![ProviderConfig::builder("a").name("a").connections(cap).build()];
        let pool = ConnectionPool::new(ProviderAllocator::new(providers, factory));
        MultiConnectionClient::new(pool, MultiClientOptions::default())
    }

    #[tokio::test]
    async fn test_stat_retries_once_on_protocol_error() {
        // first connection answers STAT with garbage, second succeeds
        let factory = ScriptedFactory::new(vec![
            b"garbled nonsense\r\n",
            b"223 0 <m1@x> exists\r\n",
        ]);
        let client = client_from(factory.clone(), 2);

        let id = MessageId::new("m1@x").unwrap();
        let status = client.stat(&id).await.unwrap();
        assert_eq!(status, ArticleStatus::Exists);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);

        // the failed connection was disposed, the good one recycled
        let pool = client.current_pool().await;
        assert_eq!(pool.status().live, 0);
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_stat_second_protocol_error_propagates() {
        let factory =
            ScriptedFactory::new(vec![b"garbled\r\n", b"also garbled\r\n", b"223 ok\r\n"]);
        let client = client_from(factory.clone(), 2);

        let id = MessageId::new("m1@x").unwrap();
        let err = client.stat(&id).await.unwrap_err();
        assert!(matches!(err, NntpError::Protocol(_)));
        // exactly one retry: the third script is never used
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_article_is_not_retried() {
        let factory = ScriptedFactory::new(vec![b"430 no such article\r\n"]);
        let client = client_from(factory.clone(), 2);

        let id = MessageId::new("m1@x").unwrap();
        assert_eq!(client.stat(&id).await.unwrap(), ArticleStatus::Missing);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_body_streams_and_recycles_connection() {
        let factory = ScriptedFactory::new(vec![b"222 body\r\nhello\r\nworld\r\n.\r\n"]);
        let client = client_from(factory.clone(), 2);

        let id = MessageId::new("m1@x").unwrap();
        let stream = client.body(&id).await.unwrap();
        let data = stream.collect().await.unwrap();
        assert_eq!(data, b"hello\r\nworld\r\n");

        // wait for the drain task to hand the connection back
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pool = client.current_pool().await;
        assert_eq!(pool.status().idle, 1);
        assert_eq!(pool.status().live, 0);
    }

    #[tokio::test]
    async fn test_body_missing_is_terminal() {
        let factory = ScriptedFactory::new(vec![b"430 gone\r\n"]);
        let client = client_from(factory.clone(), 2);

        let id = MessageId::new("m1@x").unwrap();
        let err = client.body(&id).await.unwrap_err();
        assert!(matches!(err, NntpError::ArticleMissing(_)));
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_readiness_timeout_replaces_hung_connection() {
        // server accepts BODY but never sends the terminator
        let factory = ScriptedFactory::new(vec![b"222 body\r\npartial\r\n", b"223 ok\r\n"]);
        let providers = vec![ProviderConfig::builder("a").name("a").connections(2).build()];
        let pool = ConnectionPool::new(ProviderAllocator::new(providers, factory.clone()));
        let client = MultiConnectionClient::new(
            pool,
            MultiClientOptions {
                readiness_timeout: Duration::from_millis(100),
            },
        );

        let id = MessageId::new("m1@x").unwrap();
        let stream = client.body(&id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let pool = client.current_pool().await;
        // the hung connection was disposed, not recycled
        assert_eq!(pool.status(), crate::pool::PoolEvent { live: 0, idle: 0, max: 2 });
        assert_eq!(pool.allocator().live_connections(), vec![0]);

        // the consumer sees the delivered bytes, then the drain error
        let err = stream.collect().await.unwrap_err();
        assert_eq!(err, NntpError::Timeout);
    }

    #[tokio::test]
    async fn test_wait_for_ready_cycles_a_lease() {
        let factory = ScriptedFactory::new(vec![b""]);
        let client = client_from(factory.clone(), 1);
        client.wait_for_ready().await.unwrap();
        let pool = client.current_pool().await;
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_update_pool_drains_old_and_uses_new() {
        let factory = ScriptedFactory::new(vec![b"223 one\r\n", b"223 two\r\n"]);
        let client = client_from(factory.clone(), 1);

        let id = MessageId::new("m1@x").unwrap();
        client.stat(&id).await.unwrap();
        let old_pool = client.current_pool().await;

        let providers = vec![ProviderConfig::builder("b").name("b").connections(1).build()];
        let new_pool = ConnectionPool::new(ProviderAllocator::new(providers, factory.clone()));
        client.update_pool(new_pool).await;

        assert!(old_pool.is_closed());
        client.stat(&id).await.unwrap();
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
        let pool = client.current_pool().await;
        assert_eq!(pool.status().idle, 1);
    }
}
