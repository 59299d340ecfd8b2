//! Pool bound, FIFO waiters and lease accounting

mod common;

use common::{MockArticle, MockUsenet, providers};
use nntp_streamer::allocator::ProviderAllocator;
use nntp_streamer::client::multi::{MultiClientOptions, MultiConnectionClient};
use nntp_streamer::pool::{ConnectionPool, PoolEvent};
use nntp_streamer::types::MessageId;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn single_slot_serializes_three_acquirers_in_fifo_order() {
    let mock = MockUsenet::new();
    let pool = ConnectionPool::new(ProviderAllocator::new(providers(&[("a", 1)]), mock.clone()));

    let first = pool.acquire().await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut waiters = Vec::new();
    for tag in [1, 2] {
        let pool = pool.clone();
        let order = Arc::clone(&order);
        waiters.push(tokio::spawn(async move {
            let lease = pool.acquire().await.unwrap();
            order.lock().unwrap().push(tag);
            drop(lease);
        }));
        // let the waiter reach the queue before enqueuing the next
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(waiters.iter().all(|w| !w.is_finished()));
    drop(first);

    for waiter in waiters {
        waiter.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![1, 2]);

    // one connection served everyone
    assert_eq!(mock.connect_count(), 1);
}

#[tokio::test]
async fn pool_never_exceeds_total_capacity() {
    let mock = MockUsenet::new();
    mock.add_article("m@x", MockArticle::new(b""));
    mock.set_stat_delay(Duration::from_millis(30));
    let pool = ConnectionPool::new(ProviderAllocator::new(
        providers(&[("a", 2), ("b", 1)]),
        mock.clone(),
    ));
    let client = Arc::new(MultiConnectionClient::new(
        pool,
        MultiClientOptions::default(),
    ));

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let id = MessageId::new("m@x").unwrap();
            client.stat(&id).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // never more than M=3 connections were created or held
    assert!(mock.connect_count() <= 3);
    let status = client.current_pool().await.status();
    assert_eq!(status.live, 0);
    assert!(status.idle <= 3);
}

#[tokio::test]
async fn enough_capacity_means_no_waiting() {
    let mock = MockUsenet::new();
    mock.add_article("m@x", MockArticle::new(b""));
    mock.set_stat_delay(Duration::from_millis(50));
    let pool = ConnectionPool::new(ProviderAllocator::new(providers(&[("a", 4)]), mock.clone()));
    let client = Arc::new(MultiConnectionClient::new(
        pool,
        MultiClientOptions::default(),
    ));

    // 4 callers against M=4: all proceed concurrently, so the batch
    // takes one delay round, not four
    let start = tokio::time::Instant::now();
    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let id = MessageId::new("m@x").unwrap();
                client.stat(&id).await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(150));
}

#[tokio::test]
async fn cancelled_waiter_does_not_leak_its_place() {
    let mock = MockUsenet::new();
    let pool = ConnectionPool::new(ProviderAllocator::new(providers(&[("a", 1)]), mock.clone()));

    let held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    waiter.abort();
    let _ = waiter.await;

    drop(held);
    // the abandoned wait must not consume the freed slot
    let lease = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
        .await
        .expect("acquire should not block")
        .unwrap();
    drop(lease);
    assert_eq!(pool.allocator().live_connections(), vec![1]);
}

#[tokio::test]
async fn every_state_change_publishes_a_snapshot() {
    let mock = MockUsenet::new();
    let pool = ConnectionPool::new(ProviderAllocator::new(providers(&[("a", 2)]), mock.clone()));
    let mut events = pool.subscribe();

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    drop(a);
    drop(b);

    let expected = [
        PoolEvent { live: 1, idle: 0, max: 2 },
        PoolEvent { live: 2, idle: 0, max: 2 },
        PoolEvent { live: 1, idle: 1, max: 2 },
        PoolEvent { live: 0, idle: 2, max: 2 },
    ];
    for want in expected {
        assert_eq!(events.recv().await.unwrap(), want);
    }
}
