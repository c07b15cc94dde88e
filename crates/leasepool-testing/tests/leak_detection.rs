//! Leak detection and stale-entry eviction.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use leasepool::{BoundedPool, GetConnectionOptions, PoolController, PoolOptions};
use leasepool_testing::{MockManager, MockServer};

type Controller = PoolController<BoundedPool<MockManager>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn controller() -> (Controller, MockServer) {
    init_tracing();
    let server = MockServer::new("localhost");
    (PoolController::with_manager(MockManager::new(server.clone())), server)
}

/// Diagnostics on, with a background interval long enough that only manual
/// sweeps run during a test.
fn manual_sweep_options() -> PoolOptions {
    PoolOptions::new()
        .host("localhost")
        .database("test")
        .pool_diagnostics(true)
        .leak_check_interval_ms(60_000)
}

#[tokio::test]
async fn test_held_lease_reported() {
    let (controller, _server) = controller();
    controller
        .init(manual_sweep_options().leak_threshold_ms(1))
        .await
        .unwrap();
    let pool = controller.pool().await.unwrap();

    let mut lease = controller
        .get_connection(GetConnectionOptions::new().info("nightly export"))
        .await
        .unwrap();
    lease.bind_request("/export", "GET");
    tokio::time::sleep(Duration::from_millis(15)).await;

    let report = pool.sweep_leaks().unwrap();
    assert_eq!(report.leaked.len(), 1);
    let leak = &report.leaked[0];
    assert_eq!(leak.connection_id, lease.id());
    assert!(leak.held >= Duration::from_millis(15));
    assert_eq!(leak.route.as_deref(), Some("/export"));
    assert_eq!(leak.method.as_deref(), Some("GET"));
    assert_eq!(leak.info.as_deref(), Some("nightly export"));
    assert!(report.evicted.is_empty());

    // Reported again on every sweep until released.
    assert_eq!(pool.sweep_leaks().unwrap().leaked.len(), 1);
    assert_eq!(pool.metrics().leaks_reported, 2);

    lease.release();
    assert!(pool.sweep_leaks().unwrap().is_clean());
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_fresh_lease_not_reported() {
    let (controller, _server) = controller();
    controller
        .init(manual_sweep_options().leak_threshold_ms(60_000))
        .await
        .unwrap();
    let pool = controller.pool().await.unwrap();

    let lease = controller
        .get_connection(GetConnectionOptions::new())
        .await
        .unwrap();
    assert!(pool.sweep_leaks().unwrap().is_clean());

    drop(lease);
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_stale_entry_evicted_connection_kept() {
    let (controller, server) = controller();
    controller
        .init(
            manual_sweep_options()
                .leak_threshold_ms(60_000)
                .cleanup_threshold_ms(1),
        )
        .await
        .unwrap();
    let pool = controller.pool().await.unwrap();

    let mut lease = controller
        .get_connection(GetConnectionOptions::new())
        .await
        .unwrap();
    let id = lease.id();
    tokio::time::sleep(Duration::from_millis(15)).await;

    let report = pool.sweep_leaks().unwrap();
    assert_eq!(report.evicted, vec![id]);
    assert!(!pool.registry().unwrap().contains(id));

    // A second sweep finds nothing left to evict.
    assert!(pool.sweep_leaks().unwrap().is_clean());

    // Eviction only forgets the entry; the connection is still leased.
    assert_eq!(pool.raw().leased(), 1);
    assert_eq!(server.open_connections(), 1);
    assert!(lease.execute("UPDATE test SET x = 1").await.is_ok());

    lease.release();
    assert_eq!(pool.raw().leased(), 0);
    assert_eq!(pool.metrics().evictions, 1);
    assert_eq!(pool.metrics().releases, 1);
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_reacquired_connection_survives_old_eviction() {
    let (controller, _server) = controller();
    controller
        .init(
            manual_sweep_options()
                .connection_limit(1)
                .cleanup_threshold_ms(1),
        )
        .await
        .unwrap();
    let pool = controller.pool().await.unwrap();
    let registry = pool.registry().unwrap();

    let first = controller
        .get_connection(GetConnectionOptions::new())
        .await
        .unwrap();
    let stale = registry.get(first.id()).unwrap();
    first.release();

    let second = controller
        .get_connection(GetConnectionOptions::new())
        .await
        .unwrap();
    assert_eq!(second.id(), stale.connection_id);

    // An eviction decided against the old entry must not touch the new one.
    assert!(!registry.evict(stale.connection_id, stale.acquired_at));
    assert!(registry.contains(second.id()));

    drop(second);
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_background_detector_sweeps() {
    let (controller, _server) = controller();
    controller
        .init(
            PoolOptions::new()
                .host("localhost")
                .pool_diagnostics(true)
                .leak_threshold_ms(1)
                .leak_check_interval_ms(10),
        )
        .await
        .unwrap();
    let pool = controller.pool().await.unwrap();

    let lease = controller
        .get_connection(GetConnectionOptions::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let detector = pool.leak_detector().unwrap();
    assert_eq!(detector.interval(), Duration::from_millis(10));
    assert!(detector.sweeps() >= 1);
    assert!(detector.leaks_reported() >= 1);

    drop(lease);
    controller.stop().await.unwrap();

    let sweeps = detector.sweeps();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(detector.sweeps(), sweeps);
}

#[tokio::test]
async fn test_detached_connection_leaves_pool() {
    let (controller, server) = controller();
    controller
        .init(
            manual_sweep_options()
                .connection_limit(1)
                .leak_threshold_ms(1),
        )
        .await
        .unwrap();
    let pool = controller.pool().await.unwrap();

    let lease = controller
        .get_connection(GetConnectionOptions::new())
        .await
        .unwrap();
    let id = lease.id();
    let conn = lease.detach();
    tokio::time::sleep(Duration::from_millis(5)).await;

    // No longer the pool's connection, so never reported as leaked.
    assert!(pool.sweep_leaks().unwrap().is_clean());
    let status = pool.status().unwrap();
    assert_eq!(status.total, 0);
    assert_eq!(status.in_use, 0);

    drop(conn);
    assert_eq!(server.open_connections(), 0);

    // The slot came back: a limit-1 pool can still hand out a connection.
    let next = tokio::time::timeout(
        Duration::from_secs(1),
        controller.get_connection(GetConnectionOptions::new()),
    )
    .await
    .expect("acquire after detach must not hang")
    .unwrap();
    assert_ne!(next.id(), id);
    assert_eq!(server.open_connections(), 1);

    next.release();
    controller.stop().await.unwrap();
}
