//! Provider allocation for new connections
//!
//! Picks the provider for each new connection by round-robin over the
//! configured list, skipping providers at their connection cap. Live
//! counts are tracked per provider and released exactly once when the
//! scoped connection is dropped, no matter how it leaves the pool.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::client::NntpConnection;
use crate::client::factory::ConnectionFactory;
use crate::config::ProviderConfig;
use crate::error::NntpError;

struct AllocatorState {
    /// Live connection count per provider, parallel to the provider list
    live: Vec<usize>,
    /// Next provider index to consider
    cursor: usize,
}

/// Round-robin provider selection under per-provider caps
pub struct ProviderAllocator {
    providers: Vec<ProviderConfig>,
    factory: Arc<dyn ConnectionFactory>,
    state: Arc<Mutex<AllocatorState>>,
}

impl std::fmt::Debug for ProviderAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAllocator")
            .field("providers", &self.providers.len())
            .field("total_connections", &self.total_connections())
            .finish_non_exhaustive()
    }
}

impl ProviderAllocator {
    pub fn new(providers: Vec<ProviderConfig>, factory: Arc<dyn ConnectionFactory>) -> Self {
        let live = vec![0; providers.len()];
        Self {
            providers,
            factory,
            state: Arc::new(Mutex::new(AllocatorState { live, cursor: 0 })),
        }
    }

    /// Sum of per-provider caps, clamped to at least 1
    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.providers
            .iter()
            .map(|p| p.connections.get())
            .sum::<usize>()
            .max(1)
    }

    /// Current live counts, parallel to the provider list
    #[must_use]
    pub fn live_connections(&self) -> Vec<usize> {
        self.state.lock().unwrap().live.clone()
    }

    /// Create a new authenticated connection against the next provider
    /// with spare capacity
    ///
    /// The slot is reserved before connecting and released on any
    /// failure, so a provider's live count never leaks.
    pub async fn create_connection(&self) -> Result<ScopedConnection, NntpError> {
        let (index, guard) = {
            let mut state = self.state.lock().unwrap();
            let n = self.providers.len();
            let picked = (0..n)
                .map(|offset| (state.cursor + offset) % n)
                .find(|&i| state.live[i] < self.providers[i].connections.get());
            match picked {
                Some(i) => {
                    state.live[i] += 1;
                    state.cursor = (i + 1) % n;
                    (
                        i,
                        SlotGuard {
                            state: Arc::clone(&self.state),
                            index: i,
                        },
                    )
                }
                // unreachable when the pool bound equals total_connections()
                None => {
                    warn!("all providers at connection capacity");
                    return Err(NntpError::NoCapacity);
                }
            }
        };

        let provider = &self.providers[index];
        debug!(provider = %provider.display_name(), "creating connection");
        // connect outside the lock; the guard releases the slot on failure
        let conn = self.factory.connect(provider).await?;
        Ok(ScopedConnection { conn, _slot: guard })
    }
}

/// Releases one provider slot on drop
struct SlotGuard {
    state: Arc<Mutex<AllocatorState>>,
    index: usize,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.live[self.index] = state.live[self.index].saturating_sub(1);
    }
}

/// A connection bound to its provider slot
///
/// Dropping it (normally, on error, or on replacement) frees the slot
/// exactly once.
pub struct ScopedConnection {
    conn: NntpConnection,
    _slot: SlotGuard,
}

impl std::fmt::Debug for ScopedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.conn.fmt(f)
    }
}

impl Deref for ScopedConnection {
    type Target = NntpConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for ScopedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}
