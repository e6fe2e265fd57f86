//! CleanupLoop (spec component C6): periodically shrinks each node back
//! toward `min_pools_per_node` by closing pools that have sat idle past
//! `max_idle_time`.
//!
//! No teacher file owns this shape directly (the teacher's pool never
//! shrinks); grounded on bb8's reaper task, which runs on the same
//! `tokio::time::interval` pattern to evict idle/expired connections.

use std::sync::Arc;

use crate::registry::Registry;

/// Runs forever, ticking every `registry.config().cleanup_interval`.
pub async fn run(registry: Arc<Registry>) {
    let mut ticker = tokio::time::interval(registry.config().cleanup_interval);
    loop {
        ticker.tick().await;
        tick(&registry).await;
    }
}

pub(crate) async fn tick(registry: &Registry) {
    let nodes = registry.node_snapshot().await;
    let config = registry.config();
    for node in nodes {
        if node.is_closing() {
            continue;
        }
        let removed = node.sweep_idle(config.max_idle_time, config.min_pools_per_node);
        if removed > 0 {
            registry.metrics().record_cleanup(node.url(), removed);
            registry.metrics().record_pool_count(node.url(), node.pool_count());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::metrics::NoopMetrics;

    #[tokio::test]
    async fn tick_on_empty_registry_is_a_noop() {
        let registry = Registry::new(RegistryConfig::default(), Arc::new(NoopMetrics)).unwrap();
        tick(&registry).await;
        let report = registry.fetch_pool_status().await;
        assert!(report.nodes.is_empty());
    }
}
