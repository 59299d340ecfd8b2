//! Sequential byte stream over an ordered article set
//!
//! Turns a list of segment ids plus a known total length into one
//! forward-only reader. Up to a caller-chosen number of segment fetches
//! run concurrently ahead of the read position; bytes are delivered
//! strictly in segment order no matter which fetches finish first.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::body::BodyStream;
use crate::client::cached::CachingClient;
use crate::error::NntpError;
use crate::types::MessageId;

type SegmentFetch = JoinHandle<Result<BodyStream, NntpError>>;

/// Forward-only reader over an article set with known total length
///
/// Dropping the stream cancels all outstanding segment fetches.
pub struct ArticleStream {
    client: Arc<CachingClient>,
    segments: Vec<MessageId>,
    total_size: u64,
    prefetch: usize,
    next_to_issue: usize,
    pending: VecDeque<SegmentFetch>,
    current: Option<BodyStream>,
    position: u64,
}

impl std::fmt::Debug for ArticleStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArticleStream")
            .field("segments", &self.segments.len())
            .field("total_size", &self.total_size)
            .field("position", &self.position)
            .field("in_flight", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ArticleStream {
    /// Open a stream and start prefetching the first window
    ///
    /// `prefetch` is clamped to at least 1.
    pub fn new(
        client: Arc<CachingClient>,
        segments: Vec<MessageId>,
        total_size: u64,
        prefetch: usize,
    ) -> Self {
        let mut stream = Self {
            client,
            segments,
            total_size,
            prefetch: prefetch.max(1),
            next_to_issue: 0,
            pending: VecDeque::new(),
            current: None,
            position: 0,
        };
        stream.fill_window();
        stream
    }

    /// Total byte length the set decodes to
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes delivered so far
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Issue segment fetches until the window is full
    fn fill_window(&mut self) {
        while self.pending.len() < self.prefetch && self.next_to_issue < self.segments.len() {
            let client = Arc::clone(&self.client);
            let id = self.segments[self.next_to_issue].clone();
            debug!(segment = %id, index = self.next_to_issue, "prefetching segment");
            self.pending
                .push_back(tokio::spawn(async move { client.body(&id).await }));
            self.next_to_issue += 1;
        }
    }
}

impl AsyncRead for ArticleStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let this = &mut *self;
        loop {
            if let Some(current) = this.current.as_mut() {
                let before = buf.filled().len();
                match Pin::new(current).poll_read(cx, buf) {
                    Poll::Ready(Ok(())) => {
                        let n = buf.filled().len() - before;
                        if n == 0 {
                            // segment exhausted, advance to the next one
                            this.current = None;
                            this.fill_window();
                            continue;
                        }
                        this.position += n as u64;
                        return Poll::Ready(Ok(()));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }

            let Some(handle) = this.pending.front_mut() else {
                // every segment has been consumed
                return Poll::Ready(Ok(()));
            };
            match Pin::new(handle).poll(cx) {
                Poll::Ready(Ok(Ok(stream))) => {
                    // the next fetch is issued only once this segment has
                    // been consumed, keeping the window at the prefetch
                    // degree
                    this.pending.pop_front();
                    this.current = Some(stream);
                }
                Poll::Ready(Ok(Err(err))) => {
                    this.pending.pop_front();
                    return Poll::Ready(Err(err.into()));
                }
                Poll::Ready(Err(join_err)) => {
                    this.pending.pop_front();
                    return Poll::Ready(Err(io::Error::other(join_err)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for ArticleStream {
    fn drop(&mut self) {
        for handle in &self.pending {
            handle.abort();
        }
    }
}
