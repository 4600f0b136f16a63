//! Lifecycle tests against a live server on an ephemeral port.
//!
//! These tests bind `127.0.0.1:0`, serve the full application router and
//! drive the shutdown controller the same way `main` does on a signal.
//!
//! Run with: `cargo test --test lifecycle_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use hardened_api::error::AppResult;
use hardened_api::lifecycle::{
    ResourceTracker, ShutdownController, ShutdownOutcome, ShutdownPhase, ShutdownTrigger,
};
use hardened_api::{AppState, Config, Server, build_router};

struct TestServer {
    addr: SocketAddr,
    controller: Arc<ShutdownController>,
    cleanup_calls: Arc<AtomicUsize>,
    handle: JoinHandle<AppResult<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let cleanup_calls = Arc::new(AtomicUsize::new(0));
        let tracker = Arc::new(ResourceTracker::with_cleanup({
            let calls = cleanup_calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                }
            }
        }));
        let controller = Arc::new(ShutdownController::new(
            tracker.clone(),
            Duration::from_secs(10),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Server::from_listener(listener, Duration::from_millis(500));
        let addr = server.local_addr().unwrap();

        let state = AppState::new(Config::default(), tracker).unwrap();
        let handle = tokio::spawn(server.run(build_router(state), controller.clone()));

        Self {
            addr,
            controller,
            cleanup_calls,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn wait_for_connections(&self, expected: usize) {
        for _ in 0..100 {
            if self.controller.tracker().connection_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {expected} tracked connections, found {}",
            self.controller.tracker().connection_count()
        );
    }
}

#[tokio::test]
async fn test_serves_requests_over_tcp() {
    let server = TestServer::start().await;
    let client = Client::new();

    let response = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-frame-options"], "DENY");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let response = client.get(server.url("/api/items/7")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("ratelimit-limit"));

    server
        .controller
        .shutdown(ShutdownTrigger::Signal("SIGTERM"))
        .await
        .unwrap();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_drain_closes_open_socket() {
    let server = TestServer::start().await;

    let _socket = TcpStream::connect(server.addr).await.unwrap();
    server.wait_for_connections(1).await;
    assert_eq!(server.controller.tracker().timer_count(), 0);

    let report = server
        .controller
        .shutdown(ShutdownTrigger::Signal("SIGTERM"))
        .await
        .unwrap();

    assert_eq!(report.outcome, ShutdownOutcome::Completed);
    assert_eq!(report.connections_closed, 1);
    assert_eq!(report.timers_cleared, 0);
    assert_eq!(report.exit_code(), exitcode::OK);
    assert_eq!(server.cleanup_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.controller.phase(), ShutdownPhase::Terminated);
    assert_eq!(server.controller.tracker().connection_count(), 0);

    server.handle.await.unwrap().unwrap();
    assert!(TcpStream::connect(server.addr).await.is_err());
}

#[tokio::test]
async fn test_repeated_signals_drain_once() {
    let server = TestServer::start().await;

    let (first, second, third) = tokio::join!(
        server.controller.shutdown(ShutdownTrigger::Signal("SIGTERM")),
        server.controller.shutdown(ShutdownTrigger::Signal("SIGINT")),
        server.controller.shutdown(ShutdownTrigger::Signal("SIGTERM")),
    );

    let reports = [first, second, third]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
    assert_eq!(reports.len(), 1);
    assert_eq!(server.cleanup_calls.load(Ordering::SeqCst), 1);

    // Signals after completion are ignored too
    assert!(
        server
            .controller
            .shutdown(ShutdownTrigger::Signal("SIGQUIT"))
            .await
            .is_none()
    );
    assert_eq!(server.cleanup_calls.load(Ordering::SeqCst), 1);

    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_keep_alive_request_drained_gracefully() {
    let server = TestServer::start().await;
    let client = Client::builder()
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap();

    // Leaves a pooled keep-alive connection open
    let response = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    server.wait_for_connections(1).await;

    let report = server
        .controller
        .shutdown(ShutdownTrigger::Fault("listener crashed".to_string()))
        .await
        .unwrap();

    assert_eq!(report.connections_closed, 1);
    assert_eq!(report.outcome, ShutdownOutcome::Completed);
    assert_eq!(report.exit_code(), exitcode::OK);
    assert_eq!(server.controller.tracker().connection_count(), 0);
    assert!(client.get(server.url("/health")).send().await.is_err());
}
