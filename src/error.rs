//! Error types for connection management and article retrieval
//!
//! Every failure a caller can observe is one of these kinds. The
//! distinction that matters operationally is [`NntpError::is_retryable`]:
//! retryable failures cause the multi-connection client to replace the
//! leased connection and try once more on a fresh one, terminal failures
//! propagate immediately.

use thiserror::Error;

/// Errors surfaced by the streaming client stack
///
/// Variants carry rendered messages rather than source errors so results
/// can be shared between coalesced cache waiters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NntpError {
    /// TCP/TLS connection to a provider could not be established
    #[error("cannot connect to '{provider}': {reason}")]
    CannotConnect { provider: String, reason: String },

    /// Provider rejected the configured credentials
    #[error("cannot authenticate against '{provider}': {response}")]
    CannotAuthenticate { provider: String, response: String },

    /// Every configured provider is at its connection cap
    #[error("no provider has spare connection capacity")]
    NoCapacity,

    /// Malformed or unexpected response from the news server
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server definitively does not carry the article (430)
    #[error("article missing: {0}")]
    ArticleMissing(String),

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// The operation exceeded its deadline
    #[error("operation timed out")]
    Timeout,

    /// Socket-level I/O failure
    #[error("i/o error: {0}")]
    Io(String),

    /// Anything that fits no other category
    #[error("{0}")]
    Other(String),
}

impl NntpError {
    /// Whether a fresh connection is worth trying
    ///
    /// Terminal kinds either cannot be fixed by a new connection
    /// (missing article, bad credentials, capacity) or must not be
    /// retried at all (cancellation).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ArticleMissing(_)
                | Self::CannotAuthenticate { .. }
                | Self::Cancelled
                | Self::NoCapacity
        )
    }
}

impl From<std::io::Error> for NntpError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<NntpError> for std::io::Error {
    fn from(err: NntpError) -> Self {
        match err {
            NntpError::Cancelled => std::io::Error::new(std::io::ErrorKind::Interrupted, err),
            NntpError::Timeout => std::io::Error::new(std::io::ErrorKind::TimedOut, err),
            NntpError::ArticleMissing(_) => {
                std::io::Error::new(std::io::ErrorKind::NotFound, err)
            }
            other => std::io::Error::other(other),
        }
    }
}
