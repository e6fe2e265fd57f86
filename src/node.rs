//! NodeEntry: the per-node coordination primitive (spec component C3's unit
//! of state). Holds every pool for one node URL behind a single
//! `std::sync::Mutex`, paired with a `tokio::sync::Notify` that wakes
//! dispatch waiters on any structural change (a release, a new pool, or a
//! healthy transition).
//!
//! A synchronous mutex rather than `tokio::sync::Mutex` is deliberate: every
//! critical section here is pure bookkeeping with no `.await` inside it, and
//! keeping it synchronous is what lets `PooledClient::drop` release a borrow
//! without needing an async context (see `pool.rs`). The I/O that produces a
//! new `Connection` (dialing, the readiness wait) always happens before the
//! lock is taken, never while holding it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::config::{ConnectionMode, RegistryConfig};
use crate::connection::{self, Connection};
use crate::error::{PoolError, Result};
use crate::pool::{Pool, PooledClient};

struct NodeState {
    pools: Vec<Pool>,
}

/// Aggregate view across every pool tracked by one `NodeEntry`, computed
/// under a single lock acquisition. Backs `Registry::fetch_pool_status`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeStatus {
    /// Total pools currently tracked, healthy or not.
    pub pool_count: usize,
    /// Pools whose last probe or repair succeeded.
    pub healthy_count: usize,
    /// Sum of `in_flight` across every pool.
    pub in_flight_total: u32,
    /// Sum of `capacity` across every pool.
    pub capacity_total: u32,
    /// Pools with zero borrows outstanding.
    pub idle_count: usize,
}

/// All pools for one node URL, plus the primitives that coordinate borrows,
/// growth, repair, and shrinkage across tasks.
pub struct NodeEntry {
    url: String,
    mode: ConnectionMode,
    state: Mutex<NodeState>,
    notify: Notify,
    closing: AtomicBool,
    next_pool_id: AtomicU64,
}

impl NodeEntry {
    /// Creates a node entry with no pools yet; callers grow it via `grow_by_one`.
    pub fn new(url: impl Into<String>, mode: ConnectionMode) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            mode,
            state: Mutex::new(NodeState { pools: Vec::new() }),
            notify: Notify::new(),
            closing: AtomicBool::new(false),
            next_pool_id: AtomicU64::new(1),
        })
    }

    /// The node URL this entry targets.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// True once `begin_closing` has been called; new acquires are refused.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Marks the node as closing. In-flight borrows are left alone; no new
    /// ones will be handed out.
    pub fn begin_closing(&self) {
        self.closing.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Number of pools currently tracked, healthy or not.
    pub fn pool_count(&self) -> usize {
        self.state.lock().unwrap().pools.len()
    }

    /// Dials and readies one new connection, then inserts it as a pool.
    /// Performs network I/O before taking the lock; only the `Vec::push`
    /// happens under it.
    pub async fn grow_by_one(&self, config: &RegistryConfig) -> Result<()> {
        let mut conn = Connection::new(
            self.url.clone(),
            config.max_connection_size,
            self.mode.clone(),
            config.pool_args.clone(),
        );
        conn.wait_for_ready(config.readiness_timeout, config.readiness_step, config.readiness_max_retries)
            .await?;
        let id = self.next_pool_id.fetch_add(1, Ordering::Relaxed);
        let pool = Pool::new(id, conn);
        {
            let mut state = self.state.lock().unwrap();
            state.pools.push(pool);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Scans existing pools for one with a free slot; does not grow.
    /// Ties are broken by lowest `in_flight`, then by position in `pools`
    /// (stable) — spec §4.4 step 2's load-spreading rule, rather than
    /// greedily taking the first pool encountered.
    fn try_acquire_existing(self: &Arc<Self>) -> Option<PooledClient> {
        let mut state = self.state.lock().unwrap();
        let best_idx = state
            .pools
            .iter()
            .enumerate()
            .filter(|(_, pool)| pool.is_healthy() && pool.in_flight() < pool.capacity())
            .min_by_key(|(idx, pool)| (pool.in_flight(), *idx))
            .map(|(idx, _)| idx)?;

        let pool = &mut state.pools[best_idx];
        let id = pool.id();
        let generation = pool.generation();
        let handle = pool.try_acquire()?;
        Some(PooledClient::new(Arc::clone(self), id, generation, handle))
    }

    /// The full dispatch algorithm for one node: try an existing pool, grow
    /// if under the ceiling, otherwise wait for a structural change (a
    /// release, a repair, or a new pool) and retry, until `timeout` elapses.
    /// `timeout` is the caller-supplied budget for this call (spec §4.4);
    /// `config` still governs the ceiling and the polling step.
    pub async fn acquire(self: &Arc<Self>, config: &RegistryConfig, timeout: Duration) -> Result<PooledClient> {
        let start = Instant::now();
        loop {
            if self.is_closing() {
                return Err(PoolError::NodeClosing { url: self.url.clone() });
            }
            if let Some(client) = self.try_acquire_existing() {
                return Ok(client);
            }

            if self.pool_count() < config.max_pools_per_node as usize {
                // Best-effort growth; a failure here just falls through to
                // the wait-and-retry path rather than failing the whole call.
                let _ = self.grow_by_one(config).await;
                continue;
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(PoolError::NoHealthyPools {
                    url: self.url.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            let remaining = timeout - elapsed;
            let step = config.readiness_step.min(remaining);
            let _ = tokio::time::timeout(step, self.notify.notified()).await;
        }
    }

    /// Called from `PooledClient::drop`. Synchronous by construction: no
    /// `.await` occurs anywhere in this path.
    pub(crate) fn release(&self, pool_id: u64, _generation: u64) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(pool) = state.pools.iter_mut().find(|p| p.id() == pool_id) {
                pool.release();
            }
        }
        self.notify.notify_waiters();
    }

    /// Snapshot of per-pool ids with zero in-flight borrows.
    pub fn idle_pool_ids(&self) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .pools
            .iter()
            .filter(|p| p.in_flight() == 0)
            .map(|p| p.id())
            .collect()
    }

    /// Snapshot of pool ids that are both idle and already unhealthy —
    /// the only pools `repair_pool` is allowed to act on (spec §4.5 step 4).
    pub fn unhealthy_idle_pool_ids(&self) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .pools
            .iter()
            .filter(|p| p.in_flight() == 0 && !p.is_healthy())
            .map(|p| p.id())
            .collect()
    }

    /// One-lock-acquisition snapshot of this node's aggregate pool state,
    /// backing `Registry::fetch_pool_status` and `wait_drained`.
    pub fn status(&self) -> NodeStatus {
        let state = self.state.lock().unwrap();
        let mut status = NodeStatus {
            pool_count: state.pools.len(),
            ..NodeStatus::default()
        };
        for pool in state.pools.iter() {
            if pool.is_healthy() {
                status.healthy_count += 1;
            }
            status.in_flight_total += pool.in_flight();
            status.capacity_total += pool.capacity();
            if pool.in_flight() == 0 {
                status.idle_count += 1;
            }
        }
        status
    }

    /// Waits until every pool's `in_flight` has drained to zero. Callers are
    /// expected to have already called `begin_closing` so no new borrows can
    /// arrive while this waits. Uses the create-then-check-then-await order
    /// `tokio::sync::Notify` requires to avoid a missed wakeup between the
    /// last release and this call starting to wait.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.notify.notified();
            if self.status().in_flight_total == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Probes every pool's liveness this tick via a cloned handle. Safe to
    /// call even when a pool has outstanding borrows, since the probe runs
    /// against a clone independent of whatever handle a caller is holding
    /// (spec §4.5 steps 1-3 apply to every pool, not just idle ones; only
    /// `repair_pool`, step 4, is gated on `in_flight == 0`). Returns the
    /// `(pool_id, healthy)` outcome of every pool that was ready to clone.
    pub async fn probe_all(&self) -> Vec<(u64, bool)> {
        let snapshot: Vec<(u64, Option<crate::connection::ConnectionHandle>)> = {
            let state = self.state.lock().unwrap();
            state.pools.iter().map(|p| (p.id(), p.clone_handle_for_probe())).collect()
        };

        let mut outcomes = Vec::with_capacity(snapshot.len());
        for (id, handle) in snapshot {
            let healthy = match handle {
                Some(mut handle) => connection::ping_handle(&mut handle).await.is_ok(),
                None => false,
            };
            outcomes.push((id, healthy));
        }

        {
            let mut state = self.state.lock().unwrap();
            for (id, healthy) in &outcomes {
                if let Some(pool) = state.pools.iter_mut().find(|p| p.id() == *id) {
                    pool.apply_probe_result(*healthy);
                }
            }
        }
        self.notify.notify_waiters();
        outcomes
    }

    /// Removes the pool with the given id from the active set for the
    /// duration of an async operation, so that operation can run without
    /// holding the (synchronous) node lock across an `.await`. The pool is
    /// spliced back in afterward regardless of outcome; a concurrent
    /// `acquire` simply will not see it while it is checked out.
    async fn with_pool_checked_out<F, Fut>(&self, pool_id: u64, f: F)
    where
        F: FnOnce(Pool) -> Fut,
        Fut: std::future::Future<Output = Pool>,
    {
        let taken = {
            let mut state = self.state.lock().unwrap();
            let idx = state.pools.iter().position(|p| p.id() == pool_id);
            idx.map(|i| state.pools.remove(i))
        };
        let Some(pool) = taken else { return };
        let pool = f(pool).await;
        {
            let mut state = self.state.lock().unwrap();
            state.pools.push(pool);
        }
        self.notify.notify_waiters();
    }

    /// Attempts to repair one already-unhealthy, idle pool. No-op if the
    /// pool no longer exists (e.g. removed by the cleanup loop in the
    /// meantime) or has since picked up a borrow. Callers (the health loop,
    /// via `unhealthy_idle_pool_ids`) are responsible for only calling this
    /// on pools that were idle and unhealthy at snapshot time; `repair`
    /// itself requires exclusive access to the connection, which is why
    /// this — unlike `probe_all` — checks the pool out of the vec instead of
    /// working against a clone.
    pub async fn repair_pool(&self, pool_id: u64, policy: &crate::config::RetryPolicy) {
        self.with_pool_checked_out(pool_id, |mut pool| async move {
            let _ = pool.repair(policy).await;
            pool
        })
        .await;
    }

    /// Removes and closes pools that are idle past `max_idle` and whose
    /// removal would not drop the node below `min_pools`. Closing happens
    /// outside the lock.
    pub fn sweep_idle(&self, max_idle: Duration, min_pools: u32) -> usize {
        let removed = {
            let mut state = self.state.lock().unwrap();
            let mut removed = Vec::new();
            let floor = min_pools as usize;
            let mut idx = 0;
            while state.pools.len() > floor && idx < state.pools.len() {
                if state.pools[idx].is_idle_past(max_idle) {
                    removed.push(state.pools.remove(idx));
                } else {
                    idx += 1;
                }
            }
            removed
        };
        let count = removed.len();
        for mut pool in removed {
            pool.close();
        }
        if count > 0 {
            self.notify.notify_waiters();
        }
        count
    }

    /// Closes every pool. Called once during `Registry::close_node`/`close_all`.
    pub fn close_all(&self) {
        let pools = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.pools)
        };
        for mut pool in pools {
            pool.close();
        }
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::fake_ready;

    fn test_config() -> RegistryConfig {
        RegistryConfig {
            max_pools_per_node: 2,
            ..RegistryConfig::default()
        }
    }

    fn node_with_fake_pool(capacity: u32) -> Arc<NodeEntry> {
        let node = NodeEntry::new("redis://x:6379", ConnectionMode::Single);
        {
            let mut state = node.state.lock().unwrap();
            state.pools.push(Pool::new(1, fake_ready("redis://x:6379", capacity)));
        }
        node
    }

    #[tokio::test]
    async fn acquire_reuses_existing_pool() {
        let node = node_with_fake_pool(2);
        let client = node.acquire(&test_config(), Duration::from_millis(50)).await.unwrap();
        assert_eq!(client.node_url(), "redis://x:6379");
        assert_eq!(node.pool_count(), 1);
    }

    #[tokio::test]
    async fn release_on_drop_frees_slot_for_next_waiter() {
        let node = node_with_fake_pool(1);
        {
            let _client = node.acquire(&test_config(), Duration::from_millis(50)).await.unwrap();
            assert!(node.try_acquire_existing().is_none());
        }
        // `_client` dropped here; the slot must be free again.
        assert!(node.try_acquire_existing().is_some());
    }

    #[tokio::test]
    async fn closing_node_refuses_new_acquires() {
        let node = node_with_fake_pool(2);
        node.begin_closing();
        let result = node.acquire(&test_config(), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(PoolError::NodeClosing { .. })));
    }

    #[tokio::test]
    async fn acquire_prefers_least_loaded_pool() {
        let node = NodeEntry::new("redis://x:6379", ConnectionMode::Single);
        {
            let mut state = node.state.lock().unwrap();
            state.pools.push(Pool::new(1, fake_ready("redis://x:6379", 2)));
            state.pools.push(Pool::new(2, fake_ready("redis://x:6379", 2)));
        }
        let first = node.try_acquire_existing().unwrap();
        // Pool 1 now has in_flight=1; the next acquire should prefer pool 2
        // (in_flight=0) over pool 1 again, even though pool 1 is first in
        // vector order and still has spare capacity.
        let second = node.try_acquire_existing().unwrap();
        drop(first);
        drop(second);
    }

    #[test]
    fn sweep_idle_respects_floor() {
        let node = node_with_fake_pool(1);
        let removed = node.sweep_idle(Duration::from_millis(0), 1);
        assert_eq!(removed, 0);
        assert_eq!(node.pool_count(), 1);
    }

    #[test]
    fn idle_pool_ids_lists_pools_with_no_borrows() {
        let node = node_with_fake_pool(1);
        assert_eq!(node.idle_pool_ids(), vec![1]);
    }

    #[test]
    fn unhealthy_idle_pool_ids_requires_both() {
        let node = node_with_fake_pool(1);
        assert!(node.unhealthy_idle_pool_ids().is_empty());
    }

    #[tokio::test]
    async fn probe_all_marks_healthy_pool_as_healthy() {
        let node = node_with_fake_pool(1);
        let outcomes = node.probe_all().await;
        assert_eq!(outcomes, vec![(1, true)]);
        assert_eq!(node.status().healthy_count, 1);
    }

    #[tokio::test]
    async fn probe_all_does_not_disturb_in_flight_borrow() {
        let node = node_with_fake_pool(1);
        let client = node.try_acquire_existing().unwrap();
        let outcomes = node.probe_all().await;
        assert_eq!(outcomes, vec![(1, true)]);
        assert_eq!(node.status().in_flight_total, 1);
        drop(client);
    }

    #[tokio::test]
    async fn repair_pool_on_missing_pool_is_noop() {
        let node = node_with_fake_pool(1);
        node.repair_pool(999, &crate::config::RetryPolicy::default()).await;
        assert_eq!(node.pool_count(), 1);
    }

    #[tokio::test]
    async fn wait_drained_returns_immediately_when_idle() {
        let node = node_with_fake_pool(1);
        node.wait_drained().await;
    }

    #[tokio::test]
    async fn wait_drained_waits_for_release() {
        let node = node_with_fake_pool(1);
        let client = node.try_acquire_existing().unwrap();
        let node_for_wait = Arc::clone(&node);
        let waiter = tokio::spawn(async move { node_for_wait.wait_drained().await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(client);
        waiter.await.unwrap();
    }

    #[test]
    fn status_reports_aggregate_counts() {
        let node = node_with_fake_pool(3);
        let status = node.status();
        assert_eq!(status.pool_count, 1);
        assert_eq!(status.healthy_count, 1);
        assert_eq!(status.capacity_total, 3);
        assert_eq!(status.idle_count, 1);
        assert_eq!(status.in_flight_total, 0);
    }

    #[test]
    fn close_all_empties_pools() {
        let node = node_with_fake_pool(1);
        node.close_all();
        assert_eq!(node.pool_count(), 0);
    }
}
