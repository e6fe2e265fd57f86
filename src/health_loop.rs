//! HealthLoop (spec component C5): a periodic background task that probes
//! every idle pool on every node, repairing unhealthy ones and catching
//! previously-healthy ones that have gone bad.
//!
//! Grounded on the teacher's `ConnectionManager::health_check_all_nodes`,
//! generalized from a single pass over hosts into a recurring
//! `tokio::time::interval` task, since the teacher's version was called
//! on-demand rather than scheduled.

use std::sync::Arc;

use crate::registry::Registry;

/// Runs forever, ticking every `registry.config().health_check_interval`.
/// Intended to be spawned once via `registry::start_background_loops`.
pub async fn run(registry: Arc<Registry>) {
    let mut ticker = tokio::time::interval(registry.config().health_check_interval);
    loop {
        ticker.tick().await;
        tick(&registry).await;
    }
}

/// One pass over every node: probe every pool (idle or busy, spec §4.5
/// steps 1-3), record the outcome, then attempt repair only on pools that
/// came into this tick already idle and unhealthy (step 4).
pub(crate) async fn tick(registry: &Registry) {
    let nodes = registry.node_snapshot().await;
    let policy = crate::config::RetryPolicy::default();
    for node in nodes {
        if node.is_closing() {
            continue;
        }
        let outcomes = node.probe_all().await;
        for (_, healthy) in &outcomes {
            registry.metrics().record_health_check(node.url(), *healthy);
        }

        let repair_ids = node.unhealthy_idle_pool_ids();
        for pool_id in repair_ids {
            node.repair_pool(pool_id, &policy).await;
        }
        registry.metrics().record_pool_count(node.url(), node.pool_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::metrics::NoopMetrics;
    use std::time::Duration;

    #[tokio::test]
    async fn tick_skips_closing_nodes_without_panicking() {
        let config = RegistryConfig {
            readiness_timeout: Duration::from_millis(20),
            readiness_step: Duration::from_millis(5),
            readiness_max_retries: 1,
            ..RegistryConfig::default()
        };
        let registry = Registry::new(config, Arc::new(NoopMetrics)).unwrap();
        tick(&registry).await;
    }
}
