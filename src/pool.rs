//! Pool: one `Connection` plus the bookkeeping a `NodeEntry` needs to hand
//! it out safely (spec component C2), and `PooledClient`, the scoped-borrow
//! guard that is the only sanctioned way to use a borrowed connection.
//!
//! `Pool`'s counters are mutated only while the owning `NodeEntry` holds its
//! lock (see `node.rs`); that lock is a plain `std::sync::Mutex` rather than
//! an async one precisely so that `PooledClient`'s `Drop` impl — which
//! cannot `.await` anything — can still take it to run `release` on every
//! exit path, including panics and cancellation.

use std::sync::Arc;
use std::time::Instant;

use crate::config::RetryPolicy;
use crate::connection::{Connection, ConnectionHandle};
use crate::error::Result;
use crate::node::NodeEntry;

/// One connection slot within a node's pool set.
pub struct Pool {
    id: u64,
    connection: Connection,
    in_flight: u32,
    healthy: bool,
    last_used: Instant,
    generation: u64,
}

impl Pool {
    /// Wraps a connection that has already completed its readiness wait.
    pub fn new(id: u64, connection: Connection) -> Self {
        let healthy = connection.is_ready();
        Self {
            id,
            connection,
            in_flight: 0,
            healthy,
            last_used: Instant::now(),
            generation: 0,
        }
    }

    /// Stable identity, used by `PooledClient` to find its slot again on release.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Monotonic timestamp of the last acquire or release.
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// True iff the last probe or repair succeeded.
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Number of borrows currently outstanding against this pool.
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// Maximum concurrent borrows this pool's connection may serve.
    pub fn capacity(&self) -> u32 {
        self.connection.capacity()
    }

    /// Bumped on every successful repair; lets a long-blocked waiter detect
    /// that the pool it was about to use has since been replaced.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Attempts to claim one borrow slot. Returns a cloned client handle on
    /// success; the caller (`NodeEntry::try_acquire_existing`) is responsible
    /// for pairing it with a `PooledClient`.
    pub fn try_acquire(&mut self) -> Option<ConnectionHandle> {
        if !self.healthy || self.in_flight >= self.connection.capacity() {
            return None;
        }
        let handle = self.connection.clone_client().ok()?;
        self.in_flight += 1;
        self.last_used = Instant::now();
        Some(handle)
    }

    /// Releases one borrow slot. Safe to call with `in_flight == 0`
    /// (defensive against a stale release racing a repair that already
    /// reset the pool); never panics.
    pub fn release(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.last_used = Instant::now();
    }

    /// Marks the pool unhealthy; new acquires are refused until `repair` succeeds.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    /// Re-runs the readiness wait against the existing connection. On
    /// success, marks the pool healthy again and bumps `generation`. Callers
    /// (the health loop) are responsible for only calling this when
    /// `in_flight == 0`.
    pub async fn repair(&mut self, policy: &RetryPolicy) -> Result<()> {
        let result = self
            .connection
            .wait_for_ready(policy.max_backoff * policy.max_retries, policy.initial_backoff, policy.max_retries)
            .await;
        match result {
            Ok(_) => {
                self.healthy = true;
                self.generation += 1;
                Ok(())
            }
            Err(err) => {
                self.healthy = false;
                Err(err)
            }
        }
    }

    /// A clone of this pool's handle, used to run a liveness probe that
    /// doesn't require exclusive access to the connection (see
    /// `NodeEntry::probe_all`). `None` if the connection isn't ready to
    /// clone from.
    pub(crate) fn clone_handle_for_probe(&self) -> Option<ConnectionHandle> {
        self.connection.clone_client().ok()
    }

    /// Applies the outcome of an out-of-band probe (one run against a
    /// cloned handle via `clone_handle_for_probe`, outside this pool's
    /// owning lock) without touching `in_flight`. Safe to call even while
    /// borrows are outstanding, since the probe itself never touched this
    /// pool's own handle.
    pub(crate) fn apply_probe_result(&mut self, healthy: bool) {
        self.connection.set_ready(healthy);
        self.healthy = healthy;
    }

    /// Idempotent: tears down the underlying connection and marks unhealthy.
    pub fn close(&mut self) {
        self.connection.close();
        self.healthy = false;
    }

    /// Idle iff nothing is in flight and it has sat unused past `max_idle`.
    pub fn is_idle_past(&self, max_idle: std::time::Duration) -> bool {
        self.in_flight == 0 && self.last_used.elapsed() >= max_idle
    }
}

/// A scoped borrow of one node's connection. Guarantees exactly-once release
/// of the underlying pool slot on every exit path — normal return, early
/// `?`, or an unwinding panic — via `Drop`, since `Drop::drop` is
/// synchronous and the release itself only needs a `std::sync::Mutex`
/// (see `NodeEntry::release`), never an `.await`.
pub struct PooledClient {
    node: Arc<NodeEntry>,
    pool_id: u64,
    generation: u64,
    handle: Option<ConnectionHandle>,
}

impl PooledClient {
    pub(crate) fn new(node: Arc<NodeEntry>, pool_id: u64, generation: u64, handle: ConnectionHandle) -> Self {
        Self {
            node,
            pool_id,
            generation,
            handle: Some(handle),
        }
    }

    /// The borrowed client handle. Present for the lifetime of the guard.
    pub fn client(&mut self) -> &mut ConnectionHandle {
        self.handle
            .as_mut()
            .expect("client handle present until PooledClient is dropped")
    }

    /// The node URL this borrow was taken from.
    pub fn node_url(&self) -> &str {
        self.node.url()
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        self.node.release(self.pool_id, self.generation);
    }
}
