//! # NNTP Streamer
//!
//! Multi-provider NNTP connection pool and streaming client for serving
//! Usenet article content.
//!
//! ## Architecture
//!
//! The client is a layered stack, leaves first:
//!
//! - **client**: one authenticated session to one news server (STAT,
//!   DATE, BODY, yEnc header reads, readiness tracking)
//! - **allocator**: picks the provider for each new connection by
//!   round-robin under per-provider caps
//! - **pool**: bounded lease-based pool with replacement and
//!   utilization events
//! - **client::multi**: the same surface as a single connection, with
//!   per-operation leasing, retry-on-replace and background
//!   readiness-release
//! - **client::cached**: memoizes small metadata lookups (stat, date,
//!   segment header, file size) under a bounded LRU cache
//! - **streaming**: facade owning the stack; swaps the pool on
//!   configuration changes without dropping in-flight requests
//! - **article_stream**: turns an ordered segment list with known total
//!   length into one sequential byte stream with concurrent prefetch
//!
//! ## Example
//!
//! ```no_run
//! use nntp_streamer::config::{ProviderConfig, UsenetConfig};
//! use nntp_streamer::streaming::UsenetStreamingClient;
//! use nntp_streamer::types::MessageId;
//!
//! # async fn example() -> Result<(), nntp_streamer::error::NntpError> {
//! let config = UsenetConfig {
//!     providers: vec![
//!         ProviderConfig::builder("news.example.com")
//!             .name("primary")
//!             .use_ssl(true)
//!             .credentials("user", "pass")
//!             .connections(20)
//!             .build(),
//!     ],
//! };
//! let client = UsenetStreamingClient::new(config)?;
//!
//! let id = MessageId::new("part1of3@example")?;
//! let exists = client.stat(&id).await?;
//! let body = client.segment_stream(&id).await?;
//! # let _ = (exists, body);
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod article_stream;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod stream;
pub mod streaming;
pub mod tls;
pub mod types;

pub use article_stream::ArticleStream;
pub use client::ArticleStatus;
pub use client::body::BodyStream;
pub use client::multi::MultiClientOptions;
pub use config::{ConfigChange, ProviderConfig, UsenetConfig, WATCHED_KEYS};
pub use error::NntpError;
pub use pool::PoolEvent;
pub use streaming::{HealthStatus, UsenetStreamingClient};
pub use types::MessageId;
