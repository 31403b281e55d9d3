//! Integration tests for serving, draining and shutdown over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use axum::{Router, routing::get};
use shopfront::{Lifecycle, Phase, ShutdownOutcome, StartupError, middleware::OsEntropy};
use shopfront_integration_tests::{app_with, config_with};
use tokio::sync::{Notify, oneshot};

async fn bind_ephemeral() -> (tokio::net::TcpListener, SocketAddr) {
    let listener = Lifecycle::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// A router whose `/slow` handler signals when it starts, then sleeps.
fn slow_router(started: Arc<Notify>, sleep: Duration) -> Router {
    Router::new().route(
        "/slow",
        get(move || {
            let started = started.clone();
            async move {
                started.notify_one();
                tokio::time::sleep(sleep).await;
                "done"
            }
        }),
    )
}

#[tokio::test]
async fn test_full_app_served_over_tcp() {
    let (listener, addr) = bind_ephemeral().await;
    let app = app_with(config_with(&[]), Arc::new(OsEntropy));
    let lifecycle = Lifecycle::new(Duration::from_secs(5));
    let (stop, stopped) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        lifecycle
            .serve(listener, app, async {
                let _ = stopped.await;
            })
            .await
    });

    let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("content-security-policy").is_some());

    stop.send(()).unwrap();
    let outcome = server.await.unwrap().unwrap();
    assert_eq!(outcome, ShutdownOutcome::Drained);
}

#[tokio::test]
async fn test_in_flight_request_drains() {
    let (listener, addr) = bind_ephemeral().await;
    let started = Arc::new(Notify::new());
    let app = slow_router(started.clone(), Duration::from_millis(300));

    let lifecycle = Lifecycle::new(Duration::from_secs(5));
    let mut phases = lifecycle.subscribe();
    let (stop, stopped) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        lifecycle
            .serve(listener, app, async {
                let _ = stopped.await;
            })
            .await
    });

    let client = tokio::spawn(async move {
        let response = reqwest::get(format!("http://{addr}/slow")).await?;
        response.text().await
    });

    started.notified().await;
    assert_eq!(*phases.borrow_and_update(), Phase::Serving);
    stop.send(()).unwrap();

    phases
        .wait_for(|phase| *phase == Phase::Draining)
        .await
        .unwrap();

    assert_eq!(client.await.unwrap().unwrap(), "done");
    assert_eq!(server.await.unwrap().unwrap(), ShutdownOutcome::Drained);
    assert_eq!(*phases.borrow(), Phase::Stopped);
}

#[tokio::test]
async fn test_drain_budget_abandons_stuck_requests() {
    let (listener, addr) = bind_ephemeral().await;
    let started = Arc::new(Notify::new());
    let app = slow_router(started.clone(), Duration::from_secs(30));

    let lifecycle = Lifecycle::new(Duration::from_millis(100));
    let (stop, stopped) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        lifecycle
            .serve(listener, app, async {
                let _ = stopped.await;
            })
            .await
    });

    let client = tokio::spawn(async move {
        let response = reqwest::get(format!("http://{addr}/slow")).await?;
        response.text().await
    });

    started.notified().await;
    let began = Instant::now();
    stop.send(()).unwrap();

    let outcome = server.await.unwrap().unwrap();
    assert_eq!(outcome, ShutdownOutcome::Abandoned);
    assert!(began.elapsed() < Duration::from_secs(5));

    // The connection is closed, not left to finish after the server stopped
    let reply = tokio::time::timeout(Duration::from_secs(5), client)
        .await
        .expect("abandoned connection is closed promptly")
        .unwrap();
    assert!(reply.is_err());
}

#[tokio::test]
async fn test_abandoned_handler_does_not_finish() {
    let (listener, addr) = bind_ephemeral().await;
    let started = Arc::new(Notify::new());
    let finished = Arc::new(AtomicBool::new(false));
    let app = {
        let started = started.clone();
        let finished = finished.clone();
        Router::new().route(
            "/slow",
            get(move || {
                let started = started.clone();
                let finished = finished.clone();
                async move {
                    started.notify_one();
                    tokio::time::sleep(Duration::from_millis(800)).await;
                    finished.store(true, Ordering::SeqCst);
                    "done"
                }
            }),
        )
    };

    let lifecycle = Lifecycle::new(Duration::from_millis(100));
    let mut phases = lifecycle.subscribe();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        lifecycle
            .serve(listener, app, async {
                let _ = stopped.await;
            })
            .await
    });
    let client = tokio::spawn(reqwest::get(format!("http://{addr}/slow")));

    started.notified().await;
    stop.send(()).unwrap();
    assert_eq!(server.await.unwrap().unwrap(), ShutdownOutcome::Abandoned);
    assert_eq!(*phases.borrow_and_update(), Phase::Stopped);

    assert!(client.await.unwrap().is_err());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_no_new_connections_after_shutdown() {
    let (listener, addr) = bind_ephemeral().await;
    let app = app_with(config_with(&[]), Arc::new(OsEntropy));
    let lifecycle = Lifecycle::new(Duration::from_secs(1));
    let (stop, stopped) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        lifecycle
            .serve(listener, app, async {
                let _ = stopped.await;
            })
            .await
    });

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();

    assert!(reqwest::get(format!("http://{addr}/health")).await.is_err());
}

#[tokio::test]
async fn test_bind_conflict_is_startup_error() {
    let (_listener, addr) = bind_ephemeral().await;

    let err = Lifecycle::bind(addr).await.unwrap_err();
    assert!(matches!(err, StartupError::Bind { addr: failed, .. } if failed == addr));
}
