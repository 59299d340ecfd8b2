//! Connection factory seam
//!
//! The allocator creates connections through [`ConnectionFactory`] so the
//! whole pool stack can be exercised against scripted in-process servers.
//! The real factory dials TCP (with keepalive/nodelay tuning), optionally
//! wraps TLS, then runs the greeting/AUTHINFO dialogue.

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::debug;

use crate::client::NntpConnection;
use crate::config::ProviderConfig;
use crate::constants::{socket, timeout};
use crate::error::NntpError;
use crate::stream::ConnectionStream;
use crate::tls::TlsManager;

/// Creates authenticated single connections against a provider
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Connect and authenticate; any failure surfaces verbatim
    async fn connect(&self, provider: &ProviderConfig) -> Result<NntpConnection, NntpError>;
}

/// Production factory: TCP (tuned) + optional TLS + AUTHINFO
#[derive(Debug)]
pub struct TcpConnectionFactory {
    tls: TlsManager,
}

impl TcpConnectionFactory {
    pub fn new() -> Result<Self, NntpError> {
        Ok(Self {
            tls: TlsManager::new()?,
        })
    }

    /// Create a keepalive-enabled, low-latency TCP connection
    async fn create_tuned_tcp_stream(
        &self,
        provider: &ProviderConfig,
    ) -> Result<TcpStream, NntpError> {
        let name = provider.display_name();
        let addr = format!("{}:{}", provider.host, provider.port);
        let cannot_connect = |reason: String| NntpError::CannotConnect {
            provider: name.clone(),
            reason,
        };

        let socket_addrs: Vec<SocketAddr> = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| cannot_connect(format!("DNS lookup failed: {e}")))?
            .collect();
        let socket_addr = *socket_addrs
            .first()
            .ok_or_else(|| cannot_connect(format!("no addresses found for {addr}")))?;

        let domain = if socket_addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let setup = move || -> std::io::Result<std::net::TcpStream> {
            let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(socket::KEEPALIVE_TIME)
                .with_interval(socket::KEEPALIVE_INTERVAL);
            socket.set_tcp_keepalive(&keepalive)?;
            socket.set_nodelay(true)?;
            socket.connect_timeout(&socket_addr.into(), timeout::CONNECT)?;
            let std_stream: std::net::TcpStream = socket.into();
            std_stream.set_nonblocking(true)?;
            Ok(std_stream)
        };
        let std_stream =
            tokio::task::spawn_blocking(setup)
                .await
                .map_err(|e| cannot_connect(e.to_string()))?
                .map_err(|e| cannot_connect(e.to_string()))?;
        let stream =
            TcpStream::from_std(std_stream).map_err(|e| cannot_connect(e.to_string()))?;

        debug!(provider = %name, addr = %socket_addr, "TCP connection established");
        Ok(stream)
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    async fn connect(&self, provider: &ProviderConfig) -> Result<NntpConnection, NntpError> {
        let name = provider.display_name();
        let tcp = self.create_tuned_tcp_stream(provider).await?;

        let stream = if provider.use_ssl {
            let tls = self.tls.handshake(tcp, &provider.host, &name).await?;
            ConnectionStream::tls(tls)
        } else {
            ConnectionStream::plain(tcp)
        };

        NntpConnection::establish(stream, name, &provider.user, &provider.pass).await
    }
}
