//! Shared test harness: an in-process NNTP peer over duplex pipes
//!
//! Each connection the factory creates is served by a task that speaks
//! enough of the protocol for the client stack: greeting, STAT, DATE,
//! BODY and QUIT. Behavior quirks (garbled responses, hung bodies) are
//! dealt per connection in creation order.

// not every test binary touches every helper
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use nntp_streamer::client::NntpConnection;
use nntp_streamer::client::factory::ConnectionFactory;
use nntp_streamer::config::ProviderConfig;
use nntp_streamer::error::NntpError;

/// What a mock connection does beyond the normal protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Serve everything correctly
    Normal,
    /// Answer the first command with garbage, then behave
    GarbleFirst,
    /// Accept BODY, send a partial body, then go silent
    HangMidBody,
    /// Serve BODY with a long pause in the middle of the data
    SlowBody,
}

/// An article the mock servers know about
#[derive(Debug, Clone)]
pub struct MockArticle {
    /// Raw body lines, CRLF included, as they go on the wire
    pub body: Vec<u8>,
    /// Delay before answering a BODY for this article
    pub delay: Duration,
}

impl MockArticle {
    pub fn new(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(body: &[u8], delay: Duration) -> Self {
        Self {
            body: body.to_vec(),
            delay,
        }
    }
}

/// Connection factory backed by per-connection mock server tasks
pub struct MockUsenet {
    articles: Mutex<HashMap<String, MockArticle>>,
    behaviors: Mutex<VecDeque<Behavior>>,
    stat_delay: Mutex<Duration>,
    pub connects: AtomicUsize,
    pub connected_providers: Mutex<Vec<String>>,
    pub stat_calls: Arc<AtomicUsize>,
}

impl MockUsenet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            articles: Mutex::new(HashMap::new()),
            behaviors: Mutex::new(VecDeque::new()),
            stat_delay: Mutex::new(Duration::ZERO),
            connects: AtomicUsize::new(0),
            connected_providers: Mutex::new(Vec::new()),
            stat_calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Delay every STAT answer, keeping operations in flight longer
    pub fn set_stat_delay(&self, delay: Duration) {
        *self.stat_delay.lock().unwrap() = delay;
    }

    /// Register an article; `id` is the bare message id without brackets
    pub fn add_article(&self, id: &str, article: MockArticle) {
        self.articles
            .lock()
            .unwrap()
            .insert(format!("<{id}>"), article);
    }

    /// Queue a behavior for the next created connection
    pub fn push_behavior(&self, behavior: Behavior) {
        self.behaviors.lock().unwrap().push_back(behavior);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn stat_count(&self) -> usize {
        self.stat_calls.load(Ordering::SeqCst)
    }

    pub fn providers_seen(&self) -> Vec<String> {
        self.connected_providers.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockUsenet {
    async fn connect(&self, provider: &ProviderConfig) -> Result<NntpConnection, NntpError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected_providers
            .lock()
            .unwrap()
            .push(provider.display_name());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behavior::Normal);
        let articles = self.articles.lock().unwrap().clone();
        let stat_calls = Arc::clone(&self.stat_calls);
        let stat_delay = *self.stat_delay.lock().unwrap();

        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(server, articles, behavior, stat_calls, stat_delay));
        NntpConnection::establish(client, provider.display_name(), "", "").await
    }
}

async fn serve(
    server: tokio::io::DuplexStream,
    articles: HashMap<String, MockArticle>,
    behavior: Behavior,
    stat_calls: Arc<AtomicUsize>,
    stat_delay: Duration,
) {
    let (read_half, mut w) = tokio::io::split(server);
    let mut lines = BufReader::new(read_half).lines();
    let mut garble_next = behavior == Behavior::GarbleFirst;

    if w.write_all(b"200 mock news server ready\r\n").await.is_err() {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        if garble_next {
            garble_next = false;
            let _ = w.write_all(b"!!! not a status line\r\n").await;
            continue;
        }
        if let Some(id) = line.strip_prefix("STAT ") {
            stat_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(stat_delay).await;
            let response: &[u8] = if articles.contains_key(id) {
                b"223 0 article exists\r\n"
            } else {
                b"430 no such article\r\n"
            };
            if w.write_all(response).await.is_err() {
                return;
            }
        } else if let Some(id) = line.strip_prefix("BODY ") {
            match articles.get(id) {
                Some(article) => {
                    tokio::time::sleep(article.delay).await;
                    if w.write_all(b"222 body follows\r\n").await.is_err() {
                        return;
                    }
                    if behavior == Behavior::HangMidBody {
                        let _ = w.write_all(b"partial line\r\n").await;
                        // leave the response unterminated forever
                        std::future::pending::<()>().await;
                    }
                    if behavior == Behavior::SlowBody {
                        let half = article.body.len() / 2;
                        if w.write_all(&article.body[..half]).await.is_err() {
                            return;
                        }
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        if w.write_all(&article.body[half..]).await.is_err() {
                            return;
                        }
                    } else if w.write_all(&article.body).await.is_err() {
                        return;
                    }
                    if w.write_all(b".\r\n").await.is_err() {
                        return;
                    }
                }
                None => {
                    if w.write_all(b"430 no such article\r\n").await.is_err() {
                        return;
                    }
                }
            }
        } else if line == "DATE" {
            if w.write_all(b"111 20260802120000\r\n").await.is_err() {
                return;
            }
        } else if line == "QUIT" {
            let _ = w.write_all(b"205 bye\r\n").await;
            return;
        } else {
            let _ = w.write_all(b"500 unknown command\r\n").await;
        }
    }
}

/// Provider list helper: `(name, cap)` pairs
pub fn providers(caps: &[(&str, usize)]) -> Vec<ProviderConfig> {
    caps.iter()
        .map(|(name, cap)| {
            ProviderConfig::builder(format!("{name}.example.com"))
                .name(*name)
                .connections(*cap)
                .build()
        })
        .collect()
}
