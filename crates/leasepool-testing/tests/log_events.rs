//! Log events emitted by the pool, captured through the `fmt` layer.
//!
//! Every test installs its own thread-local subscriber; nothing in this
//! binary sets a global one.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use leasepool::{BoundedPool, GetConnectionOptions, PoolController, PoolOptions};
use leasepool_testing::{LogCapture, MockManager, MockServer};

type Controller = PoolController<BoundedPool<MockManager>>;

fn controller() -> (Controller, MockServer) {
    let server = MockServer::new("localhost");
    (PoolController::with_manager(MockManager::new(server.clone())), server)
}

fn diagnostic_options() -> PoolOptions {
    PoolOptions::new()
        .host("localhost")
        .database("test")
        .pool_diagnostics(true)
        .leak_check_interval_ms(60_000)
}

#[tokio::test]
async fn test_init_logs_success() {
    let logs = LogCapture::new();
    let _guard = logs.set_default();
    let (controller, _server) = controller();

    controller.init(diagnostic_options()).await.unwrap();

    let lines = logs.lines_containing("connection to the database successful");
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("INFO"));
    assert!(lines[0].contains("leasepool:"));
    assert!(lines[0].contains("diagnostics=true"));

    controller.stop().await.unwrap();
    assert_eq!(logs.lines_containing("pool stopped").len(), 1);
}

#[tokio::test]
async fn test_leak_warning_names_connection() {
    let logs = LogCapture::new();
    let _guard = logs.set_default();
    let (controller, _server) = controller();
    controller
        .init(diagnostic_options().leak_threshold_ms(1))
        .await
        .unwrap();
    let pool = controller.pool().await.unwrap();

    let mut lease = controller
        .get_connection(GetConnectionOptions::new().info("nightly export"))
        .await
        .unwrap();
    lease.bind_request("/export", "GET");
    let id = lease.id();
    tokio::time::sleep(Duration::from_millis(15)).await;

    assert_eq!(pool.sweep_leaks().unwrap().leaked.len(), 1);

    let lines = logs.lines_containing("possible connection leak");
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert!(line.contains("WARN"));
    assert!(line.contains("leasepool:"));
    assert!(line.contains(&format!("connection {id} held for")));
    assert!(line.contains(&format!("connection_id={id} ")));
    assert!(line.contains("route=\"/export\""));
    assert!(line.contains("method=\"GET\""));
    assert!(line.contains("info=\"nightly export\""));

    // Released leases are not reported again.
    lease.release();
    logs.clear();
    assert!(pool.sweep_leaks().unwrap().is_clean());
    assert!(logs.lines_containing("possible connection leak").is_empty());

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_fresh_lease_logs_no_leak() {
    let logs = LogCapture::new();
    let _guard = logs.set_default();
    let (controller, _server) = controller();
    controller
        .init(diagnostic_options().leak_threshold_ms(60_000))
        .await
        .unwrap();
    let pool = controller.pool().await.unwrap();

    let lease = controller
        .get_connection(GetConnectionOptions::new())
        .await
        .unwrap();
    pool.sweep_leaks().unwrap();
    assert!(logs.lines_containing("possible connection leak").is_empty());

    drop(lease);
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_one_warning_per_slow_acquire() {
    let logs = LogCapture::new();
    let _guard = logs.set_default();
    let (controller, _server) = controller();
    controller
        .init(
            diagnostic_options()
                .connection_limit(2)
                .slow_acquire_threshold_ms(0),
        )
        .await
        .unwrap();
    let controller = Arc::new(controller);

    let tasks = (0..5).map(|_| {
        let controller = Arc::clone(&controller);
        async move {
            let lease = controller
                .get_connection(GetConnectionOptions::new())
                .await?;
            tokio::time::sleep(Duration::from_millis(2)).await;
            let id = lease.id();
            lease.release();
            Ok::<_, leasepool::PoolError>(id)
        }
    });
    let ids: Vec<u64> = join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let lines = logs.lines_containing("slow connection acquire");
    assert_eq!(lines.len(), 5);
    assert!(lines.iter().all(|line| line.contains("WARN")));
    assert!(lines.iter().all(|line| line.contains("leasepool:")));
    assert!(lines.iter().all(|line| line.contains("threshold_ms=0")));
    for id in ids {
        let needle = format!("connection_id={id} ");
        assert!(lines.iter().any(|line| line.contains(&needle)));
    }

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_slow_connect_warns_once() {
    let logs = LogCapture::new();
    let _guard = logs.set_default();
    let (controller, server) = controller();
    controller
        .init(diagnostic_options().slow_acquire_threshold_ms(5))
        .await
        .unwrap();

    // Served from the idle connection left by init.
    let fast = controller
        .get_connection(GetConnectionOptions::new())
        .await
        .unwrap();
    assert!(logs.lines_containing("slow connection acquire").is_empty());

    server.set_connect_latency(Duration::from_millis(30));
    let slow = controller
        .get_connection(GetConnectionOptions::new().info("report"))
        .await
        .unwrap();

    let lines = logs.lines_containing("slow connection acquire");
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert!(line.contains("WARN"));
    assert!(line.contains("leasepool:"));
    assert!(line.contains(&format!("connection_id={} ", slow.id())));
    assert!(line.contains("threshold_ms=5"));
    assert!(line.contains("info=\"report\""));

    drop(fast);
    drop(slow);
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_no_slow_warnings_without_diagnostics() {
    let logs = LogCapture::new();
    let _guard = logs.set_default();
    let (controller, _server) = controller();
    controller
        .init(
            PoolOptions::new()
                .host("localhost")
                .slow_acquire_threshold_ms(0),
        )
        .await
        .unwrap();

    for _ in 0..3 {
        let lease = controller
            .get_connection(GetConnectionOptions::new())
            .await
            .unwrap();
        lease.release();
    }

    assert!(logs.lines_containing("slow connection acquire").is_empty());
    assert_eq!(
        logs.lines_containing("connection to the database successful").len(),
        1
    );
    controller.stop().await.unwrap();
}
