//! Integration tests for the registry's end-to-end lifecycle.
//!
//! Deterministic coverage runs against `FakeTransport`, an in-process stand-in
//! for the `redis` transport enabled here via the `test-util` feature (see
//! this crate's `[dev-dependencies]`), so these tests need no live server.
//! A couple of true end-to-end tests against a real server are kept as
//! `#[ignore]`; run them with:
//!
//! ```bash
//! cargo test -- --ignored
//! ```

use redis_pool_manager::{ConnectionMode, FakeTransport, NoopMetrics, PoolError, Registry, RegistryConfig};
use std::sync::Arc;
use std::time::Duration;

fn unreachable_config() -> RegistryConfig {
    RegistryConfig {
        initial_pools_per_node: 1,
        readiness_timeout: Duration::from_millis(100),
        readiness_step: Duration::from_millis(20),
        readiness_max_retries: 3,
        ..RegistryConfig::default()
    }
}

#[tokio::test]
async fn add_node_against_unreachable_host_times_out() {
    let registry = Registry::new(unreachable_config(), Arc::new(NoopMetrics)).unwrap();
    let result = registry.add_node("redis://127.0.0.1:1").await;
    assert!(matches!(result, Err(PoolError::AddNodeTimeout { .. })));
}

#[tokio::test]
async fn get_client_against_unregistered_node_is_unknown_node() {
    let registry = Registry::new(unreachable_config(), Arc::new(NoopMetrics)).unwrap();
    let result = registry.get_client("redis://127.0.0.1:6379", Duration::from_millis(100)).await;
    assert!(matches!(result, Err(PoolError::UnknownNode { .. })));
}

#[test]
fn invalid_config_is_rejected_before_any_node_is_registered() {
    let config = RegistryConfig {
        max_pools_per_node: 1,
        initial_pools_per_node: 5,
        ..RegistryConfig::default()
    };
    let result = Registry::new(config, Arc::new(NoopMetrics));
    assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
}

/// A `RegistryConfig` routed through a `FakeTransport`, short readiness/health
/// timings so the fake-transport tests below run quickly.
fn fake_config(transport: FakeTransport) -> RegistryConfig {
    RegistryConfig {
        initial_pools_per_node: 1,
        max_pools_per_node: 3,
        min_pools_per_node: 1,
        max_connection_size: 1,
        readiness_timeout: Duration::from_millis(200),
        readiness_step: Duration::from_millis(10),
        readiness_max_retries: 10,
        connection_mode: ConnectionMode::Fake(transport),
        ..RegistryConfig::default()
    }
}

const URL: &str = "redis://fake-node:6379";

#[tokio::test]
async fn add_node_twice_is_a_no_op() {
    let registry = Registry::new(fake_config(FakeTransport::new()), Arc::new(NoopMetrics)).unwrap();
    registry.add_node(URL).await.unwrap();
    let second = registry.add_node(URL).await;
    assert!(second.is_ok());
    let report = registry.fetch_pool_status().await;
    assert_eq!(report.nodes.len(), 1);
}

#[tokio::test]
async fn happy_path_borrow_and_release() {
    let registry = Registry::new(fake_config(FakeTransport::new()), Arc::new(NoopMetrics)).unwrap();
    registry.add_node(URL).await.unwrap();

    {
        let client = registry.get_client(URL, Duration::from_millis(100)).await.unwrap();
        assert_eq!(client.node_url(), URL);
    }

    let report = registry.fetch_pool_status().await;
    assert_eq!(report.nodes.len(), 1);
    assert_eq!(report.nodes[0].pool_count, 1);
    assert_eq!(report.nodes[0].in_flight_total, 0);
}

#[tokio::test]
async fn single_pool_saturation_triggers_growth() {
    let registry = Registry::new(fake_config(FakeTransport::new()), Arc::new(NoopMetrics)).unwrap();
    registry.add_node(URL).await.unwrap();

    let first = registry.get_client(URL, Duration::from_millis(200)).await.unwrap();
    let second = registry.get_client(URL, Duration::from_millis(200)).await.unwrap();
    let report = registry.fetch_pool_status().await;
    assert_eq!(report.nodes[0].pool_count, 2);
    assert_eq!(report.nodes[0].in_flight_total, 2);
    drop(first);
    drop(second);
}

#[tokio::test]
async fn health_loop_repairs_a_failed_pool() {
    let transport = FakeTransport::new();
    let registry = Registry::new(fake_config(transport.clone()), Arc::new(NoopMetrics)).unwrap();
    registry.add_node(URL).await.unwrap();

    transport.set_ping_ok(URL, false);
    registry.run_health_check_once().await;
    let report = registry.fetch_pool_status().await;
    assert_eq!(report.nodes[0].healthy_count, 0);

    transport.set_ping_ok(URL, true);
    registry.run_health_check_once().await;
    let report = registry.fetch_pool_status().await;
    assert_eq!(report.nodes[0].healthy_count, 1);
}

#[tokio::test]
async fn cleanup_loop_shrinks_to_the_floor_but_no_further() {
    let config = RegistryConfig {
        max_idle_time: Duration::from_millis(0),
        min_pools_per_node: 1,
        initial_pools_per_node: 1,
        max_pools_per_node: 3,
        max_connection_size: 1,
        readiness_timeout: Duration::from_millis(200),
        readiness_step: Duration::from_millis(10),
        readiness_max_retries: 10,
        connection_mode: ConnectionMode::Fake(FakeTransport::new()),
        ..RegistryConfig::default()
    };
    let registry = Registry::new(config, Arc::new(NoopMetrics)).unwrap();
    registry.add_node(URL).await.unwrap();

    // Saturate to grow a second, idle pool.
    let first = registry.get_client(URL, Duration::from_millis(200)).await.unwrap();
    let second = registry.get_client(URL, Duration::from_millis(200)).await.unwrap();
    drop(first);
    drop(second);
    assert_eq!(registry.fetch_pool_status().await.nodes[0].pool_count, 2);

    registry.run_cleanup_once().await;
    let report = registry.fetch_pool_status().await;
    // Every pool is idle past max_idle_time, but min_pools_per_node holds the floor.
    assert_eq!(report.nodes[0].pool_count, 1);

    registry.run_cleanup_once().await;
    assert_eq!(registry.fetch_pool_status().await.nodes[0].pool_count, 1);
}

#[tokio::test]
async fn graceful_close_under_load() {
    let registry = Registry::new(fake_config(FakeTransport::new()), Arc::new(NoopMetrics)).unwrap();
    registry.add_node(URL).await.unwrap();

    let client = registry.get_client(URL, Duration::from_millis(200)).await.unwrap();

    let closer = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.close_node(URL).await })
    };
    // Give close_node time to mark the node closing and start draining.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let blocked = registry.get_client(URL, Duration::from_millis(50)).await;
    assert!(matches!(blocked, Err(PoolError::NodeClosing { .. })));

    drop(client);
    closer.await.unwrap().unwrap();

    let after_close = registry.get_client(URL, Duration::from_millis(50)).await;
    assert!(matches!(after_close, Err(PoolError::UnknownNode { .. })));
}

fn live_server_config() -> RegistryConfig {
    RegistryConfig {
        initial_pools_per_node: 1,
        max_pools_per_node: 4,
        min_pools_per_node: 1,
        readiness_timeout: Duration::from_secs(2),
        readiness_step: Duration::from_millis(50),
        readiness_max_retries: 10,
        ..RegistryConfig::default()
    }
}

#[tokio::test]
#[ignore]
async fn happy_path_against_live_server() {
    let registry = Registry::new(live_server_config(), Arc::new(NoopMetrics)).unwrap();
    registry.add_node("redis://127.0.0.1:6379").await.unwrap();

    {
        let mut client = registry
            .get_client("redis://127.0.0.1:6379", Duration::from_secs(2))
            .await
            .unwrap();
        let pong: String = redis::cmd("PING").query_async(client.client()).await.unwrap();
        assert_eq!(pong, "PONG");
    }

    let report = registry.fetch_pool_status().await;
    assert_eq!(report.nodes.len(), 1);
    assert_eq!(report.nodes[0].pool_count, 1);
}
