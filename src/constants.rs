//! Constants used throughout the streaming client
//!
//! This module centralizes magic numbers and configuration values
//! to improve maintainability and reduce duplication.

use std::time::Duration;

/// Connection pool constants
pub mod pool {
    use super::Duration;

    /// How long a connection may keep draining after its operation has
    /// already returned a result before it is replaced instead of recycled
    pub const READINESS_TIMEOUT: Duration = Duration::from_secs(30);

    /// Event bus topic for pool utilization snapshots
    pub const EVENT_TOPIC: &str = "usenet-connections";

    /// Capacity of the pool event broadcast channel; slow subscribers
    /// lose old snapshots rather than stalling the pool
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;
}

/// Cache constants
pub mod cache {
    /// Maximum number of memoized metadata responses (1 unit per entry)
    pub const MAX_ENTRIES: u64 = 8192;
}

/// NNTP protocol constants
pub mod protocol {
    /// Multiline response terminator: "\r\n.\r\n"
    pub const MULTILINE_TERMINATOR: &[u8] = b"\r\n.\r\n";

    /// Line ending: "\r\n"
    pub const CRLF: &[u8] = b"\r\n";

    /// Minimum response length (3-digit status code)
    pub const MIN_RESPONSE_LENGTH: usize = 3;
}

/// Timeout constants
pub mod timeout {
    use super::Duration;

    /// Connection timeout for provider connections
    pub const CONNECT: Duration = Duration::from_secs(10);
}

/// Socket tuning constants
pub mod socket {
    use super::Duration;

    /// Idle time before TCP keepalive probing starts
    pub const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

    /// Interval between TCP keepalive probes
    pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
}
