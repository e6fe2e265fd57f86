//! Connection: wraps one underlying `redis` client handle, tracks liveness,
//! and performs the readiness wait with backoff plus a one-shot health
//! probe (spec component C1).

use std::time::{Duration, Instant};

use redis::aio::MultiplexedConnection;
use redis::cluster_async::ClusterConnection;

use crate::config::ConnectionMode;
use crate::error::{PoolError, Result};

/// The underlying client handle, tagged by dispatch mode.
///
/// A tagged variant rather than a trait object, per the spec's "dynamic
/// dispatch re-architected as a tagged variant" note.
#[derive(Clone)]
pub enum ConnectionHandle {
    /// A direct connection to a single node.
    Single(MultiplexedConnection),
    /// A connection routed through the cluster client.
    Cluster(ClusterConnection),
    /// Test-only stand-in that performs no I/O; carries its own transport
    /// handle and target URL so a ping can be evaluated against whatever the
    /// test has configured, independent of any `Connection` that is holding
    /// an exclusive borrow elsewhere.
    #[cfg(any(test, feature = "test-util"))]
    Fake(crate::config::FakeTransport, String),
}

/// Issues a single PING-equivalent probe against an owned handle clone.
/// Unlike [`Connection::health_check`], this does not require exclusive
/// access to the `Connection` that produced the clone, so the health loop
/// can use it to probe a pool that still has borrows outstanding.
pub(crate) async fn ping_handle(handle: &mut ConnectionHandle) -> std::result::Result<(), redis::RedisError> {
    match handle {
        ConnectionHandle::Single(conn) => redis::cmd("PING").query_async(conn).await.map(|_: String| ()),
        ConnectionHandle::Cluster(conn) => redis::cmd("PING").query_async(conn).await.map(|_: String| ()),
        #[cfg(any(test, feature = "test-util"))]
        ConnectionHandle::Fake(transport, url) => {
            if transport.is_ping_ok(url) {
                Ok(())
            } else {
                Err(redis::RedisError::from((redis::ErrorKind::IoError, "fake transport: ping failed")))
            }
        }
    }
}

/// One connection to a node: constructed idle, readiness wait populates
/// `client`, may be probed repeatedly, `close` tears it down.
pub struct Connection {
    url: String,
    capacity: u32,
    mode: ConnectionMode,
    client: Option<ConnectionHandle>,
    ready: bool,
    pool_args: serde_json::Value,
}

impl Connection {
    /// Creates an idle connection; no I/O happens until [`Connection::wait_for_ready`].
    pub fn new(url: impl Into<String>, capacity: u32, mode: ConnectionMode, pool_args: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            capacity,
            mode,
            client: None,
            ready: false,
            pool_args,
        }
    }

    /// The node URL this connection targets.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Maximum concurrent borrows this connection may serve.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// True iff the last probe (or the readiness wait) succeeded.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// `pool_args` may carry a `"tls": true` key (switches the single-node
    /// URL to the `rediss://` scheme) consulted here; cluster mode consults
    /// `"read_from_replicas": true` below. Opaque and optional — absent or
    /// non-boolean keys are treated as unset rather than an error.
    fn effective_url(&self) -> String {
        let tls = self.pool_args.get("tls").and_then(|v| v.as_bool()).unwrap_or(false);
        if tls && self.url.starts_with("redis://") {
            format!("rediss://{}", &self.url["redis://".len()..])
        } else {
            self.url.clone()
        }
    }

    async fn dial_once(&self) -> Result<ConnectionHandle> {
        match &self.mode {
            ConnectionMode::Single => {
                let client = redis::Client::open(self.effective_url())?;
                let conn = client.get_multiplexed_async_connection().await?;
                Ok(ConnectionHandle::Single(conn))
            }
            ConnectionMode::Cluster { seed_nodes } => {
                let mut builder = redis::cluster::ClusterClientBuilder::new(seed_nodes.clone());
                let read_from_replicas = self
                    .pool_args
                    .get("read_from_replicas")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if read_from_replicas {
                    builder = builder.read_from_replicas();
                }
                let client = builder.build()?;
                let conn = client.get_async_connection().await?;
                Ok(ConnectionHandle::Cluster(conn))
            }
            #[cfg(any(test, feature = "test-util"))]
            ConnectionMode::Fake(transport) => {
                if transport.is_dial_ok(&self.url) {
                    Ok(ConnectionHandle::Fake(transport.clone(), self.url.clone()))
                } else {
                    Err(PoolError::Transport(redis::RedisError::from((
                        redis::ErrorKind::IoError,
                        "fake transport: dial failed",
                    ))))
                }
            }
        }
    }

    /// Attempts to construct the underlying client, retrying with a fixed
    /// step delay until either `max_retries` attempts or `timeout` elapses,
    /// whichever comes first. On success, `ready` is set and the elapsed
    /// time is returned; on exhaustion the connection is left not-ready and
    /// any partial client state is discarded.
    pub async fn wait_for_ready(
        &mut self,
        timeout: Duration,
        step: Duration,
        max_retries: u32,
    ) -> Result<Duration> {
        let start = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match self.dial_once().await {
                Ok(handle) => {
                    self.client = Some(handle);
                    self.ready = true;
                    return Ok(start.elapsed());
                }
                Err(_) if attempts < max_retries && start.elapsed() < timeout => {
                    tokio::time::sleep(step).await;
                }
                Err(_) => {
                    self.client = None;
                    self.ready = false;
                    return Err(PoolError::NotReady {
                        url: self.url.clone(),
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        attempts,
                    });
                }
            }
        }
    }

    /// Issues a single `PING`-equivalent probe. Does not retry internally;
    /// the health loop is responsible for scheduling repeated calls.
    pub async fn health_check(&mut self) -> Result<()> {
        let Some(handle) = self.client.as_mut() else {
            self.ready = false;
            return Err(PoolError::Unhealthy {
                url: self.url.clone(),
                source: redis::RedisError::from((redis::ErrorKind::IoError, "no client")),
            });
        };

        let outcome: std::result::Result<String, redis::RedisError> = match handle {
            ConnectionHandle::Single(conn) => redis::cmd("PING").query_async(conn).await,
            ConnectionHandle::Cluster(conn) => redis::cmd("PING").query_async(conn).await,
            #[cfg(any(test, feature = "test-util"))]
            ConnectionHandle::Fake(transport, url) => {
                if transport.is_ping_ok(url) {
                    Ok("PONG".to_string())
                } else {
                    Err(redis::RedisError::from((redis::ErrorKind::IoError, "fake transport: ping failed")))
                }
            }
        };

        match outcome {
            Ok(_) => {
                self.ready = true;
                Ok(())
            }
            Err(source) => {
                self.ready = false;
                Err(PoolError::Unhealthy {
                    url: self.url.clone(),
                    source,
                })
            }
        }
    }

    /// Returns the current client handle, failing with `NotReady` if absent.
    pub fn get_client(&mut self) -> Result<&mut ConnectionHandle> {
        if !self.ready {
            return Err(PoolError::NotReady {
                url: self.url.clone(),
                elapsed_ms: 0,
                attempts: 0,
            });
        }
        self.client.as_mut().ok_or_else(|| PoolError::NotReady {
            url: self.url.clone(),
            elapsed_ms: 0,
            attempts: 0,
        })
    }

    /// Returns a cheap clone of the current client handle, failing with
    /// `NotReady` if absent. `MultiplexedConnection` and `ClusterConnection`
    /// are themselves multiplexers over one socket, so cloning the handle to
    /// hand it to a borrower is the intended usage rather than exclusive
    /// access for the duration of the borrow.
    pub fn clone_client(&self) -> Result<ConnectionHandle> {
        if !self.ready {
            return Err(PoolError::NotReady {
                url: self.url.clone(),
                elapsed_ms: 0,
                attempts: 0,
            });
        }
        self.client.clone().ok_or_else(|| PoolError::NotReady {
            url: self.url.clone(),
            elapsed_ms: 0,
            attempts: 0,
        })
    }

    /// Idempotent: releases the underlying client and marks not-ready.
    pub fn close(&mut self) {
        self.client = None;
        self.ready = false;
    }

    /// Overwrites `ready` directly, bypassing a full probe. Used by
    /// `Pool::apply_probe_result` to apply the outcome of an out-of-band
    /// probe (one run against a cloned handle, so it did not go through
    /// `health_check` itself).
    pub(crate) fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;
    pub use crate::config::FakeTransport;

    /// Builds a `Connection` that reports ready without performing I/O,
    /// for pool/node/registry tests that exercise bookkeeping rather than
    /// real transport behavior.
    pub fn fake_ready(url: impl Into<String>, capacity: u32) -> Connection {
        let url = url.into();
        let transport = FakeTransport::new();
        Connection {
            client: Some(ConnectionHandle::Fake(transport.clone(), url.clone())),
            url,
            capacity,
            mode: ConnectionMode::Fake(transport),
            ready: true,
            pool_args: serde_json::Value::Null,
        }
    }

    /// Builds a not-yet-ready `Connection` routed through `transport`, for
    /// integration tests that want the real dial/growth/repair flow to run
    /// against a fake host instead of a live server.
    pub fn fake_connection(url: impl Into<String>, capacity: u32, transport: FakeTransport) -> Connection {
        Connection::new(url, capacity, ConnectionMode::Fake(transport), serde_json::Value::Null)
    }

    impl Connection {
        /// Test-only hook: simulate a probe failure without touching the network.
        pub(crate) fn force_unhealthy(&mut self) {
            self.ready = false;
        }

        /// Test-only hook: simulate a successful repair without touching the network.
        pub(crate) fn force_healthy(&mut self) {
            let ConnectionMode::Fake(transport) = &self.mode else {
                self.ready = true;
                return;
            };
            self.client = Some(ConnectionHandle::Fake(transport.clone(), self.url.clone()));
            self.ready = true;
        }
    }
}
