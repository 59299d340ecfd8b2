//! NNTP client layers
//!
//! - [`NntpConnection`]: one authenticated session to one news server
//! - [`factory`]: the seam that creates connections (real TCP/TLS or mock)
//! - [`multi`]: pooled client with the retry/replace/readiness protocol
//! - [`cached`]: memoizing decorator for small metadata lookups
//! - [`body`]: the byte stream handed to body consumers

pub mod body;
pub mod cached;
pub mod factory;
pub mod multi;

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

use crate::error::NntpError;
use crate::protocol::{self, Response, SegmentHeader, codes};
use crate::stream::AsyncStream;
use crate::types::MessageId;

/// Outcome of a STAT probe
///
/// A 430 is an authoritative "not here" from the server, which is why
/// negative results are safe to cache alongside positive ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleStatus {
    Exists,
    Missing,
}

/// A single authenticated NNTP session
///
/// The connection tracks whether a response is still in flight via its
/// `ready` flag. A connection that is not ready must never be handed to
/// another caller; the pool's recycle check enforces this.
pub struct NntpConnection {
    stream: BufReader<Box<dyn AsyncStream>>,
    provider: String,
    ready: bool,
    line_buf: Vec<u8>,
}

impl std::fmt::Debug for NntpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NntpConnection")
            .field("provider", &self.provider)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

impl NntpConnection {
    /// Consume the greeting and authenticate over an established transport
    ///
    /// Pass an empty `user` to skip AUTHINFO entirely. Authentication
    /// failures are terminal: credentials do not self-heal, so the pool
    /// never retries them.
    pub async fn establish(
        stream: impl AsyncStream + 'static,
        provider: impl Into<String>,
        user: &str,
        pass: &str,
    ) -> Result<Self, NntpError> {
        let provider = provider.into();
        let mut conn = Self {
            stream: BufReader::new(Box::new(stream)),
            provider,
            ready: true,
            line_buf: Vec::with_capacity(512),
        };

        let greeting = conn
            .read_response()
            .await
            .map_err(|e| NntpError::CannotConnect {
                provider: conn.provider.clone(),
                reason: e.to_string(),
            })?;
        if !matches!(
            greeting.code,
            codes::GREETING_POSTING_OK | codes::GREETING_NO_POSTING
        ) {
            return Err(NntpError::CannotConnect {
                provider: conn.provider.clone(),
                reason: format!("unexpected greeting: {} {}", greeting.code, greeting.message),
            });
        }
        debug!(provider = %conn.provider, "greeting consumed: {}", greeting.code);

        if !user.is_empty() {
            conn.authenticate(user, pass).await?;
        }

        Ok(conn)
    }

    /// AUTHINFO USER/PASS dialogue (RFC 4643)
    async fn authenticate(&mut self, user: &str, pass: &str) -> Result<(), NntpError> {
        self.send_command(&protocol::authinfo_user(user)).await?;
        let response = self.read_response().await?;
        match response.code {
            codes::AUTH_ACCEPTED => {
                debug!(provider = %self.provider, "authenticated with username only");
                Ok(())
            }
            codes::PASSWORD_REQUIRED => {
                self.send_command(&protocol::authinfo_pass(pass)).await?;
                let response = self.read_response().await?;
                if response.code == codes::AUTH_ACCEPTED {
                    debug!(provider = %self.provider, "authenticated");
                    Ok(())
                } else {
                    Err(NntpError::CannotAuthenticate {
                        provider: self.provider.clone(),
                        response: format!("{} {}", response.code, response.message),
                    })
                }
            }
            _ => Err(NntpError::CannotAuthenticate {
                provider: self.provider.clone(),
                response: format!("{} {}", response.code, response.message),
            }),
        }
    }

    /// Provider this session belongs to
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Whether no response is in flight and the session can be reused
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Check whether an article exists without fetching it
    pub async fn stat(&mut self, id: &MessageId) -> Result<ArticleStatus, NntpError> {
        self.ready = false;
        self.send_command(&protocol::stat_by_msgid(id.as_str())).await?;
        let response = self.read_response().await?;
        self.ready = true;
        match response.code {
            codes::ARTICLE_EXISTS => Ok(ArticleStatus::Exists),
            codes::NO_SUCH_ARTICLE => Ok(ArticleStatus::Missing),
            code => Err(NntpError::Protocol(format!(
                "unexpected STAT response: {code} {}",
                response.message
            ))),
        }
    }

    /// Ask the server for its current date and time (UTC, `yyyymmddhhmmss`)
    pub async fn date(&mut self) -> Result<String, NntpError> {
        self.ready = false;
        self.send_command(protocol::DATE).await?;
        let response = self.read_response().await?;
        self.ready = true;
        if response.code == codes::DATE {
            Ok(response.message)
        } else {
            Err(NntpError::Protocol(format!(
                "unexpected DATE response: {} {}",
                response.code, response.message
            )))
        }
    }

    /// Issue BODY and consume the status line
    ///
    /// On success the connection is mid-response: the caller must read
    /// body lines until [`read_body_line`](Self::read_body_line) returns
    /// `None` (or call [`wait_for_ready`](Self::wait_for_ready)) before
    /// the session can be reused.
    pub async fn begin_body(&mut self, id: &MessageId) -> Result<(), NntpError> {
        self.ready = false;
        self.send_command(&protocol::body_by_msgid(id.as_str())).await?;
        let response = self.read_response().await?;
        match response.code {
            codes::BODY_FOLLOWS => Ok(()),
            codes::NO_SUCH_ARTICLE => {
                // single-line response fully consumed, session stays usable
                self.ready = true;
                Err(NntpError::ArticleMissing(id.as_str().to_string()))
            }
            code => Err(NntpError::Protocol(format!(
                "unexpected BODY response: {code} {}",
                response.message
            ))),
        }
    }

    /// Read the next body line, dot-unstuffed, CRLF retained
    ///
    /// Returns `None` once the terminator line is consumed, at which
    /// point the connection is ready again.
    pub async fn read_body_line(&mut self) -> Result<Option<Bytes>, NntpError> {
        self.line_buf.clear();
        let n = self.stream.read_until(b'\n', &mut self.line_buf).await?;
        if n == 0 {
            return Err(NntpError::Protocol(
                "connection closed mid-body".to_string(),
            ));
        }

        let line = trim_crlf(&self.line_buf);
        if line == b"." {
            self.ready = true;
            trace!(provider = %self.provider, "body terminator consumed");
            return Ok(None);
        }

        let unstuffed = protocol::unstuff_line(line);
        let mut chunk = BytesMut::with_capacity(unstuffed.len() + 2);
        chunk.extend_from_slice(unstuffed);
        chunk.extend_from_slice(crate::constants::protocol::CRLF);
        Ok(Some(chunk.freeze()))
    }

    /// Drain the in-flight response until the connection is idle again
    pub async fn wait_for_ready(&mut self) -> Result<(), NntpError> {
        while !self.ready {
            self.read_body_line().await?;
        }
        Ok(())
    }

    /// Fetch a segment's yEnc header, draining the rest of the body
    ///
    /// Reads the `=ybegin` line and, when present, the `=ypart` line;
    /// the encoded payload is discarded unparsed.
    pub async fn fetch_segment_header(
        &mut self,
        id: &MessageId,
    ) -> Result<SegmentHeader, NntpError> {
        self.begin_body(id).await?;

        let first = self
            .read_body_line()
            .await?
            .ok_or_else(|| NntpError::Protocol("empty article body".to_string()))?;
        let ybegin = String::from_utf8_lossy(&first).into_owned();

        let header = match self.read_body_line().await? {
            Some(second) if second.starts_with(b"=ypart ") => {
                let ypart = String::from_utf8_lossy(&second).into_owned();
                SegmentHeader::parse(&ybegin, Some(&ypart))
            }
            // plain body data or an immediately-terminated article
            _ => SegmentHeader::parse(&ybegin, None),
        };

        // drain regardless of parse outcome so the session stays reusable
        self.wait_for_ready().await?;
        header
    }

    /// Fast idle health check used before recycling a pooled connection
    ///
    /// An idle NNTP session has nothing in flight; any readable byte or
    /// EOF means the server closed or desynchronized it.
    pub async fn liveness_check(&mut self) -> Result<(), NntpError> {
        if !self.ready {
            return Err(NntpError::Protocol("response still in flight".to_string()));
        }
        if !self.stream.buffer().is_empty() {
            return Err(NntpError::Protocol(
                "unexpected data on idle connection".to_string(),
            ));
        }
        let mut peek = [0u8; 1];
        match tokio::time::timeout(Duration::ZERO, self.stream.read(&mut peek)).await {
            // nothing readable: healthy idle connection
            Err(_) => Ok(()),
            Ok(Ok(0)) => Err(NntpError::Io("connection closed by remote".to_string())),
            Ok(Ok(_)) => Err(NntpError::Protocol(
                "unexpected data on idle connection".to_string(),
            )),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    /// Best-effort graceful goodbye; the response is not awaited
    pub async fn quit(&mut self) {
        let _ = self.send_command(protocol::QUIT).await;
    }

    async fn send_command(&mut self, command: &str) -> Result<(), NntpError> {
        self.stream.get_mut().write_all(command.as_bytes()).await?;
        self.stream.get_mut().flush().await?;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<Response, NntpError> {
        self.line_buf.clear();
        let n = self.stream.read_until(b'\n', &mut self.line_buf).await?;
        if n == 0 {
            return Err(NntpError::Io("connection closed by remote".to_string()));
        }
        let line = String::from_utf8_lossy(&self.line_buf);
        Response::parse(&line)
    }
}

#[inline]
fn trim_crlf(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}
