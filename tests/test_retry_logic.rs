//! Retry/replace protocol against misbehaving connections

mod common;

use common::{Behavior, MockArticle, MockUsenet, providers};
use nntp_streamer::allocator::ProviderAllocator;
use nntp_streamer::client::ArticleStatus;
use nntp_streamer::client::multi::{MultiClientOptions, MultiConnectionClient};
use nntp_streamer::pool::ConnectionPool;
use nntp_streamer::types::MessageId;
use nntp_streamer::error::NntpError;

fn client_over(mock: std::sync::Arc<MockUsenet>, caps: &[(&str, usize)]) -> MultiConnectionClient {
    let pool = ConnectionPool::new(ProviderAllocator::new(providers(caps), mock));
    MultiConnectionClient::new(pool, MultiClientOptions::default())
}

#[tokio::test]
async fn stat_retries_on_protocol_error_and_repairs_pool() {
    let mock = MockUsenet::new();
    mock.add_article("m1@x", MockArticle::new(b""));
    mock.push_behavior(Behavior::GarbleFirst);
    let client = client_over(mock.clone(), &[("a", 2)]);

    let id = MessageId::new("m1@x").unwrap();
    assert_eq!(client.stat(&id).await.unwrap(), ArticleStatus::Exists);

    // the garbled connection was replaced by a fresh one
    assert_eq!(mock.connect_count(), 2);
    let pool = client.current_pool().await;
    assert_eq!(pool.status().live, 0);
    assert_eq!(pool.status().idle, 1);
    // only the surviving connection holds a provider slot
    assert_eq!(pool.allocator().live_connections(), vec![1]);
}

#[tokio::test]
async fn two_protocol_errors_propagate_to_the_caller() {
    let mock = MockUsenet::new();
    mock.add_article("m1@x", MockArticle::new(b""));
    mock.push_behavior(Behavior::GarbleFirst);
    mock.push_behavior(Behavior::GarbleFirst);
    let client = client_over(mock.clone(), &[("a", 2)]);

    let id = MessageId::new("m1@x").unwrap();
    let err = client.stat(&id).await.unwrap_err();
    assert!(matches!(err, NntpError::Protocol(_)));
    assert_eq!(mock.connect_count(), 2);

    // both poisoned connections were disposed, their slots freed
    let pool = client.current_pool().await;
    assert_eq!(pool.status().idle, 0);
    assert_eq!(pool.allocator().live_connections(), vec![0]);
}

#[tokio::test]
async fn missing_article_propagates_without_retry() {
    let mock = MockUsenet::new();
    let client = client_over(mock.clone(), &[("a", 2)]);

    let id = MessageId::new("nowhere@x").unwrap();
    assert_eq!(client.stat(&id).await.unwrap(), ArticleStatus::Missing);
    let err = client.body(&id).await.unwrap_err();
    assert!(matches!(err, NntpError::ArticleMissing(_)));

    // a single connection served both calls and went back to idle
    assert_eq!(mock.connect_count(), 1);
    assert_eq!(client.current_pool().await.status().idle, 1);
}

#[tokio::test]
async fn body_retry_reuses_fresh_connection() {
    let mock = MockUsenet::new();
    mock.add_article("m1@x", MockArticle::new(b"payload\r\n"));
    mock.push_behavior(Behavior::GarbleFirst);
    let client = client_over(mock.clone(), &[("a", 2)]);

    let id = MessageId::new("m1@x").unwrap();
    let stream = client.body(&id).await.unwrap();
    assert_eq!(stream.collect().await.unwrap(), b"payload\r\n");
    assert_eq!(mock.connect_count(), 2);
}

#[tokio::test]
async fn callers_never_observe_mid_operation_churn() {
    // a garbled first answer is invisible to the caller apart from latency
    let mock = MockUsenet::new();
    mock.add_article("m1@x", MockArticle::new(b""));
    mock.push_behavior(Behavior::GarbleFirst);
    let client = client_over(mock.clone(), &[("a", 4)]);

    let id = MessageId::new("m1@x").unwrap();
    for _ in 0..5 {
        assert_eq!(client.stat(&id).await.unwrap(), ArticleStatus::Exists);
    }
}
