//! Observability hooks for the pool manager.
//!
//! The core contract only defines the `PoolMetrics` trait; a concrete
//! exporter (OpenTelemetry, Prometheus, or otherwise) is an embedding
//! application's concern, not this crate's. `NoopMetrics` is the default;
//! `CountingMetrics` is an in-memory reference implementation useful for
//! tests and simple status endpoints, built the way the teacher's
//! `OperationTracker` accumulates counts with atomics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Observability callbacks the registry and its background loops invoke.
/// All methods take `&self`; implementations that need interior counters
/// should use atomics or their own locking, same as `CountingMetrics` below.
pub trait PoolMetrics: Send + Sync {
    /// Called after every `get_client` attempt, successful or not.
    fn record_acquire(&self, url: &str, success: bool);

    /// Called whenever a node's pool count changes (growth or cleanup).
    fn record_pool_count(&self, url: &str, pool_count: usize);

    /// Called after every health probe or repair attempt.
    fn record_health_check(&self, url: &str, healthy: bool);

    /// Called whenever the cleanup loop removes idle pools from a node.
    fn record_cleanup(&self, url: &str, removed: usize);
}

/// Discards every observation. The registry's default if no metrics
/// implementation is supplied.
pub struct NoopMetrics;

impl PoolMetrics for NoopMetrics {
    fn record_acquire(&self, _url: &str, _success: bool) {}
    fn record_pool_count(&self, _url: &str, _pool_count: usize) {}
    fn record_health_check(&self, _url: &str, _healthy: bool) {}
    fn record_cleanup(&self, _url: &str, _removed: usize) {}
}

#[derive(Debug, Default)]
struct NodeCounters {
    acquires_ok: AtomicU64,
    acquires_failed: AtomicU64,
    health_checks_ok: AtomicU64,
    health_checks_failed: AtomicU64,
    cleanups_removed: AtomicU64,
    last_pool_count: AtomicU64,
}

/// A point-in-time snapshot of one node's counters, returned by
/// `CountingMetrics::snapshot`.
#[derive(Debug, Clone, Default)]
pub struct NodeCounterSnapshot {
    /// Successful `get_client` calls against this node.
    pub acquires_ok: u64,
    /// Failed `get_client` calls against this node.
    pub acquires_failed: u64,
    /// Successful health probes or repairs.
    pub health_checks_ok: u64,
    /// Failed health probes or repairs.
    pub health_checks_failed: u64,
    /// Total pools removed by the cleanup loop.
    pub cleanups_removed: u64,
    /// Most recently reported pool count.
    pub last_pool_count: u64,
}

/// An in-memory `PoolMetrics` implementation that accumulates per-node
/// counters. Intended for tests and simple status endpoints rather than
/// production telemetry, which should implement `PoolMetrics` against a
/// real exporter instead.
#[derive(Default)]
pub struct CountingMetrics {
    nodes: Mutex<HashMap<String, NodeCounters>>,
}

impl CountingMetrics {
    /// Builds an empty counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a consistent snapshot of one node's counters. Returns the
    /// zero-valued default if the node has never been observed.
    pub fn snapshot(&self, url: &str) -> NodeCounterSnapshot {
        let nodes = self.nodes.lock().unwrap();
        let Some(counters) = nodes.get(url) else {
            return NodeCounterSnapshot::default();
        };
        NodeCounterSnapshot {
            acquires_ok: counters.acquires_ok.load(Ordering::Relaxed),
            acquires_failed: counters.acquires_failed.load(Ordering::Relaxed),
            health_checks_ok: counters.health_checks_ok.load(Ordering::Relaxed),
            health_checks_failed: counters.health_checks_failed.load(Ordering::Relaxed),
            cleanups_removed: counters.cleanups_removed.load(Ordering::Relaxed),
            last_pool_count: counters.last_pool_count.load(Ordering::Relaxed),
        }
    }

    fn entry(&self, url: &str) -> std::sync::MutexGuard<'_, HashMap<String, NodeCounters>> {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.entry(url.to_string()).or_default();
        nodes
    }
}

impl PoolMetrics for CountingMetrics {
    fn record_acquire(&self, url: &str, success: bool) {
        let nodes = self.entry(url);
        let counters = &nodes[url];
        if success {
            counters.acquires_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.acquires_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_pool_count(&self, url: &str, pool_count: usize) {
        let nodes = self.entry(url);
        nodes[url].last_pool_count.store(pool_count as u64, Ordering::Relaxed);
    }

    fn record_health_check(&self, url: &str, healthy: bool) {
        let nodes = self.entry(url);
        let counters = &nodes[url];
        if healthy {
            counters.health_checks_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.health_checks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_cleanup(&self, url: &str, removed: usize) {
        let nodes = self.entry(url);
        nodes[url].cleanups_removed.fetch_add(removed as u64, Ordering::Relaxed);
    }
}
