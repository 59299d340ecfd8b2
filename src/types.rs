//! Core type-safe wrappers for NNTP primitives
//!
//! This module provides validated types used throughout the client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;

use crate::error::NntpError;

/// A validated NNTP message ID
///
/// Message IDs must be enclosed in angle brackets per RFC 3977 Section 3.6.
/// NZB documents conventionally store them without brackets; construction
/// accepts both forms and normalizes to the bracketed wire form.
///
/// # Examples
/// ```
/// use nntp_streamer::types::MessageId;
///
/// let a = MessageId::new("12345@example.com").unwrap();
/// let b = MessageId::new("<12345@example.com>").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "<12345@example.com>");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    /// Create a message ID, normalizing to the bracketed form
    pub fn new(s: impl Into<String>) -> Result<Self, NntpError> {
        let s = s.into();
        let trimmed = s.trim();
        let bare = trimmed
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .unwrap_or(trimmed);
        if bare.is_empty() {
            return Err(NntpError::Protocol("empty message id".to_string()));
        }
        if bare.contains(['<', '>', ' ', '\r', '\n']) {
            return Err(NntpError::Protocol(format!(
                "invalid message id: {trimmed:?}"
            )));
        }
        Ok(Self(format!("<{bare}>")))
    }

    /// The bracketed wire form, e.g. `<12345@example.com>`
    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MessageId {
    type Error = NntpError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// A non-zero per-provider connection cap
///
/// Ensures the allocator always has at least 1 connection slot per provider.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaxConnections(NonZeroUsize);

impl MaxConnections {
    /// Default connection cap per provider
    pub const DEFAULT: Self = Self(NonZeroUsize::new(10).unwrap());

    /// Create a new cap; returns `None` for zero
    #[must_use]
    pub const fn new(value: usize) -> Option<Self> {
        match NonZeroUsize::new(value) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Create a cap, clamping zero up to 1
    #[must_use]
    pub fn clamped(value: usize) -> Self {
        Self(NonZeroUsize::new(value.max(1)).unwrap())
    }

    /// Get the inner value
    #[must_use]
    #[inline]
    pub const fn get(&self) -> usize {
        self.0.get()
    }
}

impl Default for MaxConnections {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for MaxConnections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl From<MaxConnections> for usize {
    fn from(val: MaxConnections) -> Self {
        val.get()
    }
}

impl Serialize for MaxConnections {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.get() as u64)
    }
}

impl<'de> Deserialize<'de> for MaxConnections {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = usize::deserialize(deserializer)?;
        Ok(Self::clamped(value))
    }
}
