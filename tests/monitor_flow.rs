//! Integration tests for the active-connection monitor.

mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::MockGateway;
use rpcdeck::monitor::ConnectionMonitor;
use serde_json::json;

fn gateway_with(addresses: &[&str]) -> MockGateway {
    let gw = MockGateway::new();
    gw.on(Method::GET, "/active/get", json!({ "data": addresses }));
    gw
}

#[tokio::test]
async fn refresh_replaces_the_board() {
    let gw = gateway_with(&["10.0.0.1:443", "10.0.0.2:443"]);
    let (backend, _) = gw.start().await;
    let monitor = ConnectionMonitor::new(backend);

    assert_eq!(monitor.refresh().await.unwrap(), 2);
    let board = monitor.snapshot();
    assert_eq!(board.count(), 2);
    assert_eq!(board.entries()[1].address, "10.0.0.2:443");
    assert_eq!(board.entries()[1].hint, "close connection to 10.0.0.2:443");

    gw.on(Method::GET, "/active/get", json!({ "data": null }));
    assert_eq!(monitor.refresh().await.unwrap(), 0);
    assert_eq!(monitor.snapshot().refresh_count(), 2);
}

#[tokio::test]
async fn confirmed_close_removes_one_entry() {
    let gw = gateway_with(&["a:1", "b:2", "c:3"]);
    gw.on(
        Method::DELETE,
        "/active/close/b:2",
        json!({ "data": { "success": true } }),
    );
    let (backend, _) = gw.start().await;
    let monitor = ConnectionMonitor::new(backend);
    monitor.refresh().await.unwrap();

    assert!(monitor.close("b:2").await.unwrap());
    let board = monitor.snapshot();
    assert_eq!(board.count(), 2);
    assert!(!board.contains("b:2"));
    assert!(board.contains("a:1") && board.contains("c:3"));

    let delete = gw.requests().last().cloned().unwrap();
    assert_eq!(delete.method, Method::DELETE);
    assert_eq!(delete.path, "/active/close/b:2");
}

#[tokio::test]
async fn declined_close_leaves_board_unchanged() {
    let gw = gateway_with(&["a:1", "b:2"]);
    gw.on(
        Method::DELETE,
        "/active/close/a:1",
        json!({ "data": { "success": false } }),
    );
    let (backend, _) = gw.start().await;
    let monitor = ConnectionMonitor::new(backend);
    monitor.refresh().await.unwrap();

    assert!(!monitor.close("a:1").await.unwrap());
    let board = monitor.snapshot();
    assert_eq!(board.count(), 2);
    assert!(board.entries().iter().all(|e| !e.closing));
}

#[tokio::test]
async fn failed_close_clears_busy_mark() {
    let gw = gateway_with(&["a:1"]);
    gw.on_status(
        Method::DELETE,
        "/active/close/a:1",
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({}),
    );
    let (backend, _) = gw.start().await;
    let monitor = ConnectionMonitor::new(backend);
    monitor.refresh().await.unwrap();

    assert!(monitor.close("a:1").await.is_err());
    let board = monitor.snapshot();
    assert_eq!(board.count(), 1);
    assert!(!board.entries()[0].closing);
}

#[tokio::test]
async fn refresh_task_runs_until_stopped() {
    let gw = gateway_with(&["a:1"]);
    let (backend, _) = gw.start().await;
    let monitor = ConnectionMonitor::new(backend);

    let task = monitor.spawn_refresh(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(110)).await;
    assert!(!task.is_stopped());
    task.shutdown().await;

    let seen = gw.request_count();
    assert!(seen >= 2, "expected several refreshes, saw {seen}");
    assert_eq!(monitor.snapshot().count(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(gw.request_count(), seen);
}

#[tokio::test]
async fn dropping_the_task_stops_refreshing() {
    let gw = gateway_with(&[]);
    let (backend, _) = gw.start().await;
    let monitor = ConnectionMonitor::new(backend);

    let task = monitor.spawn_refresh(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(task);
    // Let an in-flight refresh settle.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let seen = gw.request_count();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(gw.request_count(), seen);
}

#[tokio::test]
async fn refresh_failure_keeps_previous_board() {
    let gw = gateway_with(&["a:1"]);
    let (backend, _) = gw.start().await;
    let monitor = ConnectionMonitor::new(backend);
    monitor.refresh().await.unwrap();

    gw.on_status(
        Method::GET,
        "/active/get",
        StatusCode::BAD_GATEWAY,
        json!({ "error": "down" }),
    );
    assert!(monitor.refresh().await.is_err());
    assert_eq!(monitor.snapshot().count(), 1);
}

#[tokio::test]
async fn first_periodic_refresh_waits_one_period() {
    let gw = gateway_with(&["a:1"]);
    let (backend, _) = gw.start().await;
    let monitor = ConnectionMonitor::new(backend);

    let task = monitor.spawn_refresh(Duration::from_millis(200));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gw.request_count(), 0);
    task.shutdown().await;
}
