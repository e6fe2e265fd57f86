//! Registry: folds together NodeRegistry and Dispatcher (spec components C3
//! and C4) into the one type applications hold. Owns the node map, starts
//! the background loops, and is the entry point for `get_client`,
//! `add_node`, and the close operations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};

use crate::cleanup_loop;
use crate::config::{LogConfig, RegistryConfig};
use crate::error::{PoolError, Result};
use crate::health_loop;
use crate::metrics::PoolMetrics;
use crate::node::NodeEntry;
use crate::pool::PooledClient;

/// Point-in-time view of one node, returned by `Registry::fetch_pool_status`.
#[derive(Debug, Clone)]
pub struct NodeStatusReport {
    /// The node's URL.
    pub url: String,
    /// Number of pools currently tracked.
    pub pool_count: usize,
    /// Pools whose last probe or repair succeeded.
    pub healthy_count: usize,
    /// Sum of `in_flight` across every pool on this node.
    pub in_flight_total: u32,
    /// Sum of `capacity` across every pool on this node.
    pub capacity_total: u32,
    /// Pools with zero borrows outstanding.
    pub idle_count: usize,
    /// True once the node has begun closing.
    pub closing: bool,
}

/// Point-in-time view across every registered node.
#[derive(Debug, Clone)]
pub struct PoolStatusReport {
    /// One entry per registered node.
    pub nodes: Vec<NodeStatusReport>,
}

/// Coordinates every node's connection pools, the health loop, and the
/// cleanup loop for one logical Redis-compatible deployment (a single node
/// or a cluster's seed set).
pub struct Registry {
    nodes: RwLock<HashMap<String, Arc<NodeEntry>>>,
    config: RegistryConfig,
    metrics: Arc<dyn PoolMetrics>,
    health_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    cleanup_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Registry {
    /// Builds a registry with no nodes registered yet. Callers add nodes
    /// with `add_node`, then call `start_background_loops` once.
    pub fn new(config: RegistryConfig, metrics: Arc<dyn PoolMetrics>) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
            config,
            metrics,
            health_handle: std::sync::Mutex::new(None),
            cleanup_handle: std::sync::Mutex::new(None),
        }))
    }

    /// Installs a global `tracing` subscriber from the given configuration.
    /// Optional: embedding applications that already manage a subscriber
    /// should skip this.
    pub fn init_logging(log_config: &LogConfig) {
        log_config.init();
    }

    /// Registers a node and brings up `initial_pools_per_node` connections
    /// in parallel. Succeeds once at least one pool is healthy within
    /// `readiness_timeout`; any pools still short of `initial_pools_per_node`
    /// are left for later on-demand growth in `get_client` and for the
    /// health loop to keep probing (spec §4.3: "the remainder may be
    /// deferred"). A no-op if `url` is already registered — the
    /// existence-check and insert happen under one held write lock so two
    /// concurrent `add_node` calls on the same URL can't race past each
    /// other and leak a `NodeEntry`.
    pub async fn add_node(&self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        let node = {
            let mut nodes = self.nodes.write().await;
            if nodes.contains_key(&url) {
                return Ok(());
            }
            let node = NodeEntry::new(url.clone(), self.config.connection_mode.clone());
            nodes.insert(url.clone(), Arc::clone(&node));
            node
        };

        let mut attempts = JoinSet::new();
        for _ in 0..self.config.initial_pools_per_node {
            let node = Arc::clone(&node);
            let config = self.config.clone();
            attempts.spawn(async move { node.grow_by_one(&config).await.is_ok() });
        }
        let mut ready = 0usize;
        while let Some(outcome) = attempts.join_next().await {
            if matches!(outcome, Ok(true)) {
                ready += 1;
            }
        }

        if ready == 0 {
            self.nodes.write().await.remove(&url);
            return Err(PoolError::AddNodeTimeout {
                url,
                timeout_ms: self.config.readiness_timeout.as_millis() as u64,
            });
        }

        self.metrics.record_pool_count(&url, node.pool_count());
        Ok(())
    }

    /// Returns a scoped borrow of a connection to `url`, growing the node's
    /// pool set or waiting on contention as needed, per spec.md's dispatch
    /// algorithm. `timeout` is this call's own wait budget.
    pub async fn get_client(&self, url: &str, timeout: Duration) -> Result<PooledClient> {
        let node = {
            let nodes = self.nodes.read().await;
            nodes
                .get(url)
                .cloned()
                .ok_or_else(|| PoolError::UnknownNode { url: url.to_string() })?
        };
        let result = node.acquire(&self.config, timeout).await;
        self.metrics.record_acquire(url, result.is_ok());
        result
    }

    /// Snapshot of every registered node's pool state.
    pub async fn fetch_pool_status(&self) -> PoolStatusReport {
        let nodes = self.nodes.read().await;
        let entries = nodes
            .values()
            .map(|node| {
                let status = node.status();
                NodeStatusReport {
                    url: node.url().to_string(),
                    pool_count: status.pool_count,
                    healthy_count: status.healthy_count,
                    in_flight_total: status.in_flight_total,
                    capacity_total: status.capacity_total,
                    idle_count: status.idle_count,
                    closing: node.is_closing(),
                }
            })
            .collect();
        PoolStatusReport { nodes: entries }
    }

    /// Marks one node closing, waits for every outstanding borrow against it
    /// to drain (per `Pool::close`'s `in_flight == 0` precondition), then
    /// tears down its pools and removes it from the registry. Idempotent if
    /// the node is already gone. The node stays in the map for the duration
    /// of the drain, so a concurrent `get_client` sees `NodeClosing` rather
    /// than `UnknownNode`.
    pub async fn close_node(&self, url: &str) -> Result<()> {
        let node = {
            let nodes = self.nodes.read().await;
            nodes
                .get(url)
                .cloned()
                .ok_or_else(|| PoolError::UnknownNode { url: url.to_string() })?
        };
        node.begin_closing();
        node.wait_drained().await;
        node.close_all();
        self.nodes.write().await.remove(url);
        Ok(())
    }

    /// Marks every node closing, waits for each to drain, then tears down
    /// every pool and clears the registry.
    pub async fn close_all(&self) {
        let nodes: Vec<Arc<NodeEntry>> = self.nodes.read().await.values().cloned().collect();
        for node in &nodes {
            node.begin_closing();
        }
        for node in &nodes {
            node.wait_drained().await;
            node.close_all();
        }
        self.nodes.write().await.clear();
    }

    /// Snapshot of currently registered node URLs, used by the background
    /// loops to iterate without holding the registry lock across I/O.
    pub(crate) async fn node_snapshot(&self) -> Vec<Arc<NodeEntry>> {
        self.nodes.read().await.values().cloned().collect()
    }

    pub(crate) fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub(crate) fn metrics(&self) -> &Arc<dyn PoolMetrics> {
        &self.metrics
    }

    /// Test-only hook: runs one health-loop pass synchronously instead of
    /// waiting out `health_check_interval`, so integration tests can exercise
    /// repair deterministically against a `FakeTransport`.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn run_health_check_once(&self) {
        health_loop::tick(self).await;
    }

    /// Test-only hook: runs one cleanup-loop pass synchronously instead of
    /// waiting out `cleanup_interval`.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn run_cleanup_once(&self) {
        cleanup_loop::tick(self).await;
    }
}

/// Spawns the health loop and cleanup loop against `registry`. The returned
/// handles are stored on the registry itself; dropping the `Arc<Registry>`
/// does not stop them on its own — call `stop_background_loops` first.
pub fn start_background_loops(registry: &Arc<Registry>) {
    let health = tokio::spawn(health_loop::run(Arc::clone(registry)));
    let cleanup = tokio::spawn(cleanup_loop::run(Arc::clone(registry)));
    *registry.health_handle.lock().unwrap() = Some(health);
    *registry.cleanup_handle.lock().unwrap() = Some(cleanup);
}

/// Aborts the health loop and cleanup loop tasks, if running.
pub fn stop_background_loops(registry: &Registry) {
    if let Some(handle) = registry.health_handle.lock().unwrap().take() {
        handle.abort();
    }
    if let Some(handle) = registry.cleanup_handle.lock().unwrap().take() {
        handle.abort();
    }
}

/// Convenience helper mirroring the teacher's retry wrapper: repeats
/// `operation` with exponential backoff while the returned error is
/// retryable, up to `policy.max_retries` attempts.
pub async fn execute_with_retry<F, Fut, T>(policy: &crate::config::RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && err.is_retryable() => {
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
