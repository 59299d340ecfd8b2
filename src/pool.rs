//! Bounded connection pool with leases, replacement and utilization events
//!
//! Built on deadpool's managed pool: connections are created lazily
//! through the [`ProviderAllocator`], recycled when idle and healthy, and
//! replaced when a lease is marked. The pool size equals the allocator's
//! total capacity, so provider caps and the pool bound agree by
//! construction.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use deadpool::managed;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::allocator::{ProviderAllocator, ScopedConnection};
use crate::client::NntpConnection;
use crate::constants::pool::EVENT_CHANNEL_CAPACITY;
use crate::error::NntpError;

/// Utilization snapshot published on every pool state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolEvent {
    /// Connections currently leased out
    pub live: usize,
    /// Connections parked in the pool
    pub idle: usize,
    /// Upper bound on total connections
    pub max: usize,
}

impl fmt::Display for PoolEvent {
    /// Wire format used on the `usenet-connections` topic
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.live, self.max, self.idle)
    }
}

/// deadpool manager backed by the provider allocator
pub struct NntpManager {
    allocator: Arc<ProviderAllocator>,
}

impl fmt::Debug for NntpManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NntpManager").finish_non_exhaustive()
    }
}

impl managed::Manager for NntpManager {
    type Type = ScopedConnection;
    type Error = NntpError;

    async fn create(&self) -> Result<ScopedConnection, NntpError> {
        self.allocator.create_connection().await
    }

    async fn recycle(
        &self,
        conn: &mut ScopedConnection,
        _: &managed::Metrics,
    ) -> managed::RecycleResult<NntpError> {
        // cheap TCP-level check; catches sessions closed by the server
        // while parked and sessions returned mid-response
        conn.liveness_check().await.map_err(|e| {
            debug!(provider = %conn.provider(), "discarding stale connection: {e}");
            managed::RecycleError::Message(e.to_string().into())
        })
    }
}

type Pool = managed::Pool<NntpManager>;

/// Bounded pool of authenticated NNTP connections
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool,
    allocator: Arc<ProviderAllocator>,
    events: broadcast::Sender<PoolEvent>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Create a pool bounded at the allocator's total capacity
    pub fn new(allocator: ProviderAllocator) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self::with_event_sender(allocator, events)
    }

    /// Create a pool that publishes on an existing event channel
    ///
    /// Used across reconfigurations so subscribers keep their receiver
    /// while the pool behind it is swapped out.
    pub fn with_event_sender(
        allocator: ProviderAllocator,
        events: broadcast::Sender<PoolEvent>,
    ) -> Self {
        let allocator = Arc::new(allocator);
        let max_size = allocator.total_connections();
        let manager = NntpManager {
            allocator: Arc::clone(&allocator),
        };
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .runtime(deadpool::Runtime::Tokio1)
            .build()
            .expect("pool construction cannot fail with a runtime set");

        info!(max_connections = max_size, "connection pool created");
        Self {
            pool,
            allocator,
            events,
        }
    }

    /// Lease a connection, creating or recycling one as needed
    ///
    /// Blocks FIFO behind other waiters when the pool is at capacity;
    /// dropping the returned future abandons the wait.
    pub async fn acquire(&self) -> Result<Lease, NntpError> {
        let obj = self.pool.get().await.map_err(|e| match e {
            managed::PoolError::Backend(err) => err,
            managed::PoolError::Timeout(_) => NntpError::Timeout,
            managed::PoolError::Closed => NntpError::Other("connection pool closed".to_string()),
            other => NntpError::Other(format!("pool failure: {other}")),
        })?;
        self.publish();
        Ok(Lease {
            obj: Some(obj),
            replace: false,
            pool: self.pool.clone(),
            events: self.events.clone(),
        })
    }

    /// Current utilization snapshot
    #[must_use]
    pub fn status(&self) -> PoolEvent {
        let status = self.pool.status();
        PoolEvent {
            live: status.size.saturating_sub(status.available),
            idle: status.available,
            max: status.max_size,
        }
    }

    /// Subscribe to utilization events
    ///
    /// Publication is best-effort over a broadcast channel: it never
    /// blocks the pool, and lagging subscribers skip old snapshots.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// The allocator this pool draws from
    #[must_use]
    pub fn allocator(&self) -> &ProviderAllocator {
        &self.allocator
    }

    /// Whether the pool has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Stop handing out connections and drain the pool
    ///
    /// Idle connections get a best-effort QUIT; leased connections are
    /// disposed as their leases return. New acquires fail immediately.
    pub async fn close(&self) {
        let idle = self.pool.status().available;
        debug!(idle, "closing pool, sending QUIT to idle connections");

        for _ in 0..idle {
            let mut timeouts = managed::Timeouts::new();
            timeouts.wait = Some(Duration::from_millis(1));
            match self.pool.timeout_get(&timeouts).await {
                Ok(obj) => {
                    let mut conn = managed::Object::take(obj);
                    conn.quit().await;
                }
                // only immediately-available connections are drained here
                Err(_) => break,
            }
        }

        self.pool.close();
        self.publish();
        info!("connection pool closed");
    }

    fn publish(&self) {
        let _ = self.events.send(self.status());
    }
}

/// Exclusive short-term grant of one pooled connection
///
/// Dropping the lease releases the connection: back to the idle set
/// normally, or disposed (slot freed) when marked for replacement.
pub struct Lease {
    obj: Option<managed::Object<NntpManager>>,
    replace: bool,
    pool: Pool,
    events: broadcast::Sender<PoolEvent>,
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("replace", &self.replace)
            .finish_non_exhaustive()
    }
}

impl Lease {
    /// The leased connection
    pub fn connection(&mut self) -> &mut NntpConnection {
        self.obj.as_mut().expect("lease already released")
    }

    /// Mark the connection for disposal instead of reuse
    ///
    /// Takes effect when the lease is dropped; it does not release.
    pub fn replace(&mut self) {
        self.replace = true;
    }

    /// Whether the connection will be disposed on release
    #[must_use]
    pub fn is_marked_for_replace(&self) -> bool {
        self.replace
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            if self.replace {
                // detach from the pool and dispose; the scoped
                // connection frees its provider slot
                let conn = managed::Object::take(obj);
                debug!(provider = %conn.provider(), "disposing replaced connection");
                drop(conn);
            } else {
                drop(obj);
            }
        }
        let status = self.pool.status();
        let _ = self.events.send(PoolEvent {
            live: status.size.saturating_sub(status.available),
            idle: status.available,
            max: status.max_size,
        });
    }
}
