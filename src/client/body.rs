//! Byte stream handed to article body consumers
//!
//! The pooled client drains the server response in a background task and
//! forwards chunks through a channel; [`BodyStream`] adapts the receiving
//! end to `AsyncRead`. Decoupling the consumer from the socket is what
//! lets the connection finish draining (and return to the pool) at
//! network speed regardless of how fast the caller reads.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::error::NntpError;

/// Sequential reader over one article body
///
/// Chunks already delivered remain readable even after the underlying
/// connection has been released or replaced. Dropping the stream early
/// cancels the drain task's forwarding, which marks the connection for
/// replacement.
pub struct BodyStream {
    rx: mpsc::UnboundedReceiver<Result<Bytes, NntpError>>,
    current: Bytes,
    done: bool,
}

impl BodyStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Result<Bytes, NntpError>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            done: false,
        }
    }

    /// Collect the remaining body into memory
    pub async fn collect(mut self) -> Result<Vec<u8>, NntpError> {
        let mut out = Vec::with_capacity(self.current.len());
        out.extend_from_slice(&self.current);
        self.current = Bytes::new();
        while let Some(chunk) = self.rx.recv().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStream")
            .field("buffered", &self.current.len())
            .field("done", &self.done)
            .finish()
    }
}

impl AsyncRead for BodyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.current.is_empty() {
                let n = self.current.len().min(buf.remaining());
                buf.put_slice(&self.current.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if self.done {
                return Poll::Ready(Ok(()));
            }
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.current = chunk;
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Err(e.into()));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
