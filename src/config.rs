//! Provider configuration types and the reconfiguration protocol
//!
//! The configuration store lives outside this crate; it hands the
//! streaming client an immutable [`UsenetConfig`] snapshot and a stream of
//! [`ConfigChange`] notifications. The client only rebuilds its pool when
//! a changed key is one of [`WATCHED_KEYS`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::MaxConnections;

/// Configuration keys that require a pool rebuild when they change
pub const WATCHED_KEYS: &[&str] = &[
    "usenet.host",
    "usenet.port",
    "usenet.use-ssl",
    "usenet.user",
    "usenet.pass",
    "usenet.connections",
    "usenet.providers",
];

/// Configuration for a single Usenet provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Display name for logs and diagnostics
    #[serde(default)]
    pub name: String,
    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    /// Maximum simultaneous connections the operator may open here
    #[serde(default)]
    pub connections: MaxConnections,
}

impl ProviderConfig {
    /// Create a builder for constructing a provider record
    ///
    /// # Examples
    ///
    /// ```
    /// use nntp_streamer::config::ProviderConfig;
    ///
    /// let provider = ProviderConfig::builder("news.example.com")
    ///     .name("primary")
    ///     .port(563)
    ///     .use_ssl(true)
    ///     .credentials("user", "pass")
    ///     .connections(20)
    ///     .build();
    /// assert_eq!(provider.connections.get(), 20);
    /// ```
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ProviderConfigBuilder {
        ProviderConfigBuilder::new(host)
    }

    /// Display name, falling back to `host:port` when unnamed
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("{}:{}", self.host, self.port)
        } else {
            self.name.clone()
        }
    }
}

/// Builder for [`ProviderConfig`], mostly a convenience for tests
pub struct ProviderConfigBuilder {
    name: String,
    host: String,
    port: Option<u16>,
    use_ssl: bool,
    user: String,
    pass: String,
    connections: MaxConnections,
}

impl ProviderConfigBuilder {
    fn new(host: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            host: host.into(),
            port: None,
            use_ssl: false,
            user: String::new(),
            pass: String::new(),
            connections: MaxConnections::DEFAULT,
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn use_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.user = user.into();
        self.pass = pass.into();
        self
    }

    /// Connection cap; zero is clamped up to 1
    #[must_use]
    pub fn connections(mut self, connections: usize) -> Self {
        self.connections = MaxConnections::clamped(connections);
        self
    }

    #[must_use]
    pub fn build(self) -> ProviderConfig {
        let port = self.port.unwrap_or_else(|| {
            if self.use_ssl {
                defaults::SSL_PORT
            } else {
                defaults::port()
            }
        });
        ProviderConfig {
            name: self.name,
            host: self.host,
            port,
            use_ssl: self.use_ssl,
            user: self.user,
            pass: self.pass,
            connections: self.connections,
        }
    }
}

/// Immutable snapshot of the Usenet configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UsenetConfig {
    /// Ordered provider list; order determines round-robin rotation
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl UsenetConfig {
    /// Total connection capacity across all providers, clamped to at least 1
    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.providers
            .iter()
            .map(|p| p.connections.get())
            .sum::<usize>()
            .max(1)
    }
}

/// A change notification from the configuration store
#[derive(Debug, Clone)]
pub struct ConfigChange {
    /// Keys whose values changed in this revision
    pub keys: HashSet<String>,
    /// Full configuration after the change
    pub snapshot: UsenetConfig,
}

impl ConfigChange {
    /// Whether this change touches any key the pool is built from
    #[must_use]
    pub fn affects_pool(&self) -> bool {
        WATCHED_KEYS.iter().any(|key| self.keys.contains(*key))
    }
}

/// Default values for provider records
pub mod defaults {
    /// Standard NNTP port
    pub fn port() -> u16 {
        119
    }

    /// Standard NNTPS port, used by the builder when TLS is requested
    pub const SSL_PORT: u16 = 563;
}
