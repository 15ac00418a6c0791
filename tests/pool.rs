//! End-to-end behaviour of a connection pool against the in-memory server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nntp_pool::mock::MockServer;
use nntp_pool::{ConnectionPool, Error, Operation, Request, Response, ServerTarget};
use tokio::sync::mpsc;

fn start_pool(server: &MockServer, size: usize) -> (flume::Sender<Request>, ConnectionPool) {
    let (tx, rx) = flume::unbounded();
    let mut pool = ConnectionPool::with_connector(
        ServerTarget::new("news.test", 119),
        rx,
        size,
        Arc::new(server.clone()),
    );
    pool.start();
    (tx, pool)
}

async fn receive(responses: &mut mpsc::Receiver<Response>, count: usize) -> Vec<Response> {
    let mut received = Vec::with_capacity(count);
    for _ in 0..count {
        let response = tokio::time::timeout(Duration::from_secs(5), responses.recv())
            .await
            .expect("timed out waiting for response")
            .expect("stream closed early");
        received.push(response);
    }
    received
}

async fn run_one(server: &MockServer, request: Request) -> Response {
    let (tx, mut pool) = start_pool(server, 1);
    let mut responses = pool.collect();
    tx.send(request).unwrap();
    let response = receive(&mut responses, 1).await.remove(0);
    pool.stop();
    response
}

#[tokio::test]
async fn check_not_found_is_not_an_error() {
    let server = MockServer::new().with_group("alt.test");

    let response = run_one(&server, Request::check("missing@test", ["alt.test"])).await;
    assert_eq!(response.operation, Operation::CheckExistence);
    assert!(!response.article.exists);
    assert_eq!(response.error, None);
    assert_eq!(server.commands(), vec!["GROUP alt.test", "STAT <missing@test>"]);
}

#[tokio::test]
async fn fetch_returns_unstuffed_body() {
    let server = MockServer::new().with_article("alt.test", "a@test", "hello\r\n");

    let response = run_one(&server, Request::fetch("a@test", ["alt.test"])).await;
    assert_eq!(response.error, None);
    assert!(response.article.exists);
    assert_eq!(response.article.content.as_deref(), Some(&b"hello\r\n"[..]));
    assert_eq!(response.source, "news.test:0");
}

#[tokio::test]
async fn fallback_protocol_error_then_not_found_skips_remaining_groups() {
    // "a" cannot be selected, so STAT there reports 412. "b" answers 430.
    let server = MockServer::new()
        .with_reply("GROUP a", "503 temporarily unavailable")
        .with_group("b")
        .with_article("c", "y@test", "body\r\n");

    let response = run_one(&server, Request::check("y@test", ["a", "b", "c"])).await;
    assert!(!response.article.exists);
    assert_eq!(response.error, None);
    assert_eq!(server.count_commands("GROUP c"), 0);
    assert_eq!(server.count_commands("STAT"), 2);
}

#[tokio::test]
async fn fallback_exhaustion_reports_last_error() {
    let server = MockServer::new().with_group("b");

    // "a" does not exist (BODY gets 412), then "b" answers 430.
    let response = run_one(&server, Request::fetch("z@test", ["a", "b"])).await;
    assert_eq!(
        response.error,
        Some(Error::NoSuchArticle("z@test".to_string()))
    );
    assert!(!response.article.exists);
    assert!(response.article.content.is_none());
    assert_eq!(server.count_commands("BODY"), 2);
}

#[tokio::test]
async fn degraded_worker_answers_not_connected() {
    let server = MockServer::new().refuse_connections();

    let response = run_one(&server, Request::check("a@test", ["alt.test"])).await;
    assert_eq!(response.error, Some(Error::NotConnected));
    assert_eq!(server.connections(), 1);
    assert!(server.commands().is_empty());
}

#[tokio::test]
async fn rejected_credentials_degrade_the_worker() {
    let server = MockServer::new()
        .with_credentials("reader", "secret")
        .with_group("alt.test");
    let (tx, rx) = flume::unbounded();
    let mut pool = ConnectionPool::with_connector(
        ServerTarget::new("news.test", 119).with_credentials("reader", "wrong"),
        rx,
        1,
        Arc::new(server.clone()),
    );
    pool.start();
    let mut responses = pool.collect();

    tx.send(Request::check("a@test", ["alt.test"])).unwrap();
    let response = receive(&mut responses, 1).await.remove(0);
    assert_eq!(response.error, Some(Error::NotConnected));
    assert_eq!(server.count_commands("GROUP"), 0);
    pool.stop();
}

#[tokio::test]
async fn every_response_is_collected_once_then_stream_closes() {
    let mut server = MockServer::new();
    for i in 0..20 {
        server = server.with_article("alt.test", format!("{i}@test"), "x\r\n");
    }
    let (tx, mut pool) = start_pool(&server, 4);
    let mut responses = pool.collect();

    for i in 0..25 {
        tx.send(Request::check(format!("{i}@test"), ["alt.test"]))
            .unwrap();
    }

    let received = receive(&mut responses, 25).await;
    pool.stop();
    assert!(responses.recv().await.is_none());

    let mut by_id: HashMap<String, bool> = HashMap::new();
    for response in received {
        assert_eq!(response.error, None);
        assert!(by_id
            .insert(response.article.id.clone(), response.article.exists)
            .is_none());
    }
    assert_eq!(by_id.len(), 25);
    for i in 0..25 {
        assert_eq!(by_id[&format!("{i}@test")], i < 20);
    }
    assert_eq!(pool.stats().completed(), 25);
    assert_eq!(pool.stats().failed(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_bounded_by_pool_size() {
    let server = MockServer::new()
        .with_article("alt.test", "a@test", "body\r\n")
        .with_latency(Duration::from_millis(5));
    let (tx, mut pool) = start_pool(&server, 3);
    let stats = pool.stats();
    let mut responses = pool.collect();

    for _ in 0..30 {
        tx.send(Request::fetch("a@test", ["alt.test"])).unwrap();
    }
    let received = receive(&mut responses, 30).await;
    pool.stop();
    assert!(responses.recv().await.is_none());

    assert!(received.iter().all(|r| r.error.is_none()));
    assert!(stats.peak_busy() <= 3);
    assert!(stats.peak_busy() >= 1);
    assert_eq!(stats.busy(), 0);
    // Groups stay selected between requests on the same connection.
    assert!(server.count_commands("GROUP") <= 3);
    assert_eq!(server.connections(), 3);
    assert_eq!(server.overlaps(), 0);
}

#[tokio::test]
async fn responses_name_the_connection_that_produced_them() {
    let server = MockServer::new()
        .with_group("alt.test")
        .with_latency(Duration::from_millis(2));
    let (tx, mut pool) = start_pool(&server, 2);
    let mut responses = pool.collect();

    for i in 0..10 {
        tx.send(Request::check(format!("{i}@test"), ["alt.test"]))
            .unwrap();
    }
    let received = receive(&mut responses, 10).await;
    pool.stop();

    for response in &received {
        assert!(
            response.source == "news.test:0" || response.source == "news.test:1",
            "unexpected source {}",
            response.source
        );
    }
}

#[tokio::test]
async fn stop_without_collect_closes_cleanly() {
    let server = MockServer::new();
    let (tx, mut pool) = start_pool(&server, 2);
    pool.stop();

    // Submissions after stop are never answered; the queue may already be
    // closed.
    let _ = tx.send(Request::check("a@test", ["alt.test"]));
    let mut late = pool.collect();
    assert!(late.recv().await.is_none());
}

#[tokio::test]
async fn closing_the_queue_keeps_dispatched_work() {
    let server = MockServer::new().with_article("alt.test", "a@test", "body\r\n");
    let (tx, mut pool) = start_pool(&server, 2);
    let mut responses = pool.collect();

    tx.send(Request::fetch("a@test", ["alt.test"])).unwrap();
    drop(tx);

    let response = receive(&mut responses, 1).await.remove(0);
    assert!(response.article.exists);

    pool.stop();
    assert!(responses.recv().await.is_none());
}
