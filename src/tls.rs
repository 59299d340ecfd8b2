//! TLS configuration and handshake management for NNTP connections
//!
//! Uses rustls with the ring crypto provider. Certificates come from the
//! system store when available, with the Mozilla CA bundle as fallback.
//! One `ClientConfig` is shared per factory so session resumption works
//! across pool connections.

use crate::error::NntpError;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, client::TlsStream};
use tracing::{debug, warn};

/// Shared TLS connector for provider connections
#[derive(Clone)]
pub struct TlsManager {
    config: Arc<ClientConfig>,
}

impl std::fmt::Debug for TlsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsManager").finish_non_exhaustive()
    }
}

impl TlsManager {
    /// Build a connector backed by system certificates with the
    /// Mozilla CA bundle as fallback
    pub fn new() -> Result<Self, NntpError> {
        let mut root_store = RootCertStore::empty();
        let mut sources = Vec::new();

        let native = rustls_native_certs::load_native_certs();
        let mut added = 0;
        for cert in native.certs {
            if root_store.add(cert).is_ok() {
                added += 1;
            }
        }
        for error in native.errors {
            warn!("TLS: certificate loading error: {}", error);
        }
        if added > 0 {
            sources.push("system certificates");
        }

        if root_store.is_empty() {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            sources.push("Mozilla CA bundle");
        }

        debug!("TLS: certificate sources: {}", sources.join(", "));

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| NntpError::Other(format!("TLS config with ring provider failed: {e}")))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Perform the TLS handshake against a provider
    pub async fn handshake(
        &self,
        stream: TcpStream,
        hostname: &str,
        provider: &str,
    ) -> Result<TlsStream<TcpStream>, NntpError> {
        let connector = TlsConnector::from(Arc::clone(&self.config));
        let domain = rustls_pki_types::ServerName::try_from(hostname)
            .map_err(|e| NntpError::CannotConnect {
                provider: provider.to_string(),
                reason: format!("invalid hostname for TLS: {e}"),
            })?
            .to_owned();

        debug!("TLS: connecting to {} with rustls", hostname);
        connector
            .connect(domain, stream)
            .await
            .map_err(|e| NntpError::CannotConnect {
                provider: provider.to_string(),
                reason: format!("TLS handshake failed: {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_manager_builds_and_shares_config() {
        let manager = TlsManager::new().unwrap();
        let cloned = manager.clone();
        assert!(Arc::ptr_eq(&manager.config, &cloned.config));
    }

    #[tokio::test]
    async fn test_handshake_rejects_invalid_hostname() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();

        let manager = TlsManager::new().unwrap();
        let result = manager.handshake(stream, "not a hostname", "test").await;
        assert!(matches!(result, Err(NntpError::CannotConnect { .. })));
    }
}
