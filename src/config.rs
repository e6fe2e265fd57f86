//! Configuration types for the connection pool manager.
//!
//! `RegistryConfig` collects every knob the registry and its background
//! loops consult; the rest of this module is supporting detail (retry
//! policy, connection mode, and optional logging setup) in the same
//! builder-method style the ambient stack uses elsewhere in this crate.

use std::time::Duration;

use crate::error::{PoolError, Result};

/// Single-node vs. cluster dispatch, carried as a tagged variant rather than
/// a trait object (see DESIGN.md's Open Question on dynamic dispatch).
#[derive(Debug, Clone)]
pub enum ConnectionMode {
    /// Connect directly to one node URL.
    Single,
    /// Connect via the cluster client, seeded with the given node list.
    Cluster {
        /// Seed node addresses used for cluster topology discovery.
        seed_nodes: Vec<String>,
    },
    /// Route through an in-process [`FakeTransport`] instead of dialing a
    /// real server. Only constructible in test builds or with the
    /// `test-util` feature enabled, so it can never reach a production
    /// `RegistryConfig` by accident.
    #[cfg(any(test, feature = "test-util"))]
    Fake(FakeTransport),
}

/// In-process stand-in for the `redis` transport, used by integration tests
/// to exercise the pool manager's growth, repair, and drain logic without a
/// live server. Lets a test force a specific host's dial or ping to fail on
/// demand (spec's repair and graceful-close-under-load scenarios both need
/// this). Grounded on the injectable-connector pattern other pool crates use
/// for the same purpose (e.g. bb8's `Manager` trait) rather than spinning up
/// real servers for deterministic tests.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    state: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<String, FakeHostState>>>,
}

#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, Copy)]
struct FakeHostState {
    dial_ok: bool,
    ping_ok: bool,
}

#[cfg(any(test, feature = "test-util"))]
impl Default for FakeHostState {
    fn default() -> Self {
        Self { dial_ok: true, ping_ok: true }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl FakeTransport {
    /// A fresh transport where every host dials and pings successfully
    /// until told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces `url`'s dial attempts to succeed or fail from now on.
    pub fn set_dial_ok(&self, url: &str, ok: bool) {
        self.state.lock().unwrap().entry(url.to_string()).or_default().dial_ok = ok;
    }

    /// Forces `url`'s ping probes to succeed or fail from now on.
    pub fn set_ping_ok(&self, url: &str, ok: bool) {
        self.state.lock().unwrap().entry(url.to_string()).or_default().ping_ok = ok;
    }

    pub(crate) fn is_dial_ok(&self, url: &str) -> bool {
        self.state.lock().unwrap().get(url).map(|s| s.dial_ok).unwrap_or(true)
    }

    pub(crate) fn is_ping_ok(&self, url: &str) -> bool {
        self.state.lock().unwrap().get(url).map(|s| s.ping_ok).unwrap_or(true)
    }
}

/// Readiness-wait and retry policy shared by `Connection::wait_for_ready`
/// and any other operation that backs off on failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Delay is multiplied by this factor after each failed attempt.
    pub backoff_multiplier: f64,
    /// Backoff never grows past this.
    pub max_backoff: Duration,
    /// Hard cap on the number of attempts, independent of the overall timeout.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// Returns the backoff delay to use after `attempt` prior failures
    /// (`attempt` is 0 for the delay before the second overall attempt).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max_backoff)
    }
}

/// Log verbosity, mirrored on the teacher's `LogLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Trace-level verbosity.
    Trace,
    /// Debug-level verbosity.
    Debug,
    /// Info-level verbosity (default).
    Info,
    /// Warnings only.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Output format for the optional logging initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text.
    Text,
    /// Structured JSON, suitable for log aggregation.
    Json,
}

/// Optional logging configuration; the registry never initializes a global
/// subscriber on its own unless a caller opts in via
/// [`crate::registry::Registry::init_logging`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level to emit.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    /// Installs a global `tracing` subscriber from this configuration.
    ///
    /// Mirrors the teacher's `Client::initialize_logging`; kept as a
    /// free-standing method so the registry's constructor does not force a
    /// global subscriber on embedding applications that already have one.
    pub fn init(&self) {
        use tracing_subscriber::EnvFilter;

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_filter_str()));

        match self.format {
            LogFormat::Json => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .json()
                    .try_init();
            }
            LogFormat::Text => {
                let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
            }
        }
    }
}

/// Top-level configuration consumed by [`crate::registry::Registry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Number of pools eagerly created when a node is added.
    pub initial_pools_per_node: u32,
    /// Upper bound on pools per node; `Dispatcher::get_client` will not grow
    /// a node past this even under contention.
    pub max_pools_per_node: u32,
    /// Floor below which the cleanup loop will not shrink a node.
    pub min_pools_per_node: u32,
    /// Maximum concurrent borrows a single pool's connection may serve.
    pub max_connection_size: u32,
    /// Interval between health loop ticks.
    pub health_check_interval: Duration,
    /// Interval between cleanup loop ticks.
    pub cleanup_interval: Duration,
    /// A pool idle longer than this (with zero in-flight) is eligible for
    /// cleanup, subject to `min_pools_per_node`.
    pub max_idle_time: Duration,
    /// Overall budget for `Connection::wait_for_ready`.
    pub readiness_timeout: Duration,
    /// Base step between readiness retries.
    pub readiness_step: Duration,
    /// Hard cap on readiness retry attempts.
    pub readiness_max_retries: u32,
    /// Single-node or cluster dispatch.
    pub connection_mode: ConnectionMode,
    /// Opaque pass-through options forwarded verbatim to the underlying
    /// client library's connection builder (e.g. TLS or replica-read
    /// settings the `redis` crate exposes but this crate does not model).
    pub pool_args: serde_json::Value,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            initial_pools_per_node: 1,
            max_pools_per_node: 4,
            min_pools_per_node: 1,
            max_connection_size: 10,
            health_check_interval: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(30),
            max_idle_time: Duration::from_secs(300),
            readiness_timeout: Duration::from_secs(5),
            readiness_step: Duration::from_millis(100),
            readiness_max_retries: 10,
            connection_mode: ConnectionMode::Single,
            pool_args: serde_json::Value::Null,
        }
    }
}

impl RegistryConfig {
    /// Validates the configuration's internal consistency.
    ///
    /// Grounded on the teacher's `Credentials::validate` pattern: reject
    /// obviously broken configuration eagerly rather than failing
    /// confusingly deep inside a background loop.
    pub fn validate(&self) -> Result<()> {
        if self.initial_pools_per_node < 1 {
            return Err(PoolError::InvalidConfig(
                "initial_pools_per_node must be >= 1".to_string(),
            ));
        }
        if self.max_pools_per_node < self.initial_pools_per_node {
            return Err(PoolError::InvalidConfig(
                "max_pools_per_node must be >= initial_pools_per_node".to_string(),
            ));
        }
        if self.min_pools_per_node > self.initial_pools_per_node {
            return Err(PoolError::InvalidConfig(
                "min_pools_per_node must be <= initial_pools_per_node".to_string(),
            ));
        }
        if self.max_connection_size < 1 {
            return Err(PoolError::InvalidConfig(
                "max_connection_size must be >= 1".to_string(),
            ));
        }
        if let ConnectionMode::Cluster { seed_nodes } = &self.connection_mode {
            if seed_nodes.is_empty() {
                return Err(PoolError::InvalidConfig(
                    "cluster mode requires at least one seed node".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Sets the pool sizing bounds in one call.
    pub fn with_pool_bounds(mut self, min: u32, initial: u32, max: u32) -> Self {
        self.min_pools_per_node = min;
        self.initial_pools_per_node = initial;
        self.max_pools_per_node = max;
        self
    }

    /// Sets the per-pool connection capacity.
    pub fn with_connection_size(mut self, size: u32) -> Self {
        self.max_connection_size = size;
        self
    }

    /// Enables cluster mode with the given seed nodes.
    pub fn with_cluster(mut self, seed_nodes: Vec<String>) -> Self {
        self.connection_mode = ConnectionMode::Cluster { seed_nodes };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RegistryConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_max_below_initial() {
        let config = RegistryConfig {
            max_pools_per_node: 1,
            initial_pools_per_node: 2,
            ..RegistryConfig::default()
        };
        assert!(matches!(config.validate(), Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_min_above_initial() {
        let config = RegistryConfig {
            min_pools_per_node: 3,
            initial_pools_per_node: 2,
            ..RegistryConfig::default()
        };
        assert!(matches!(config.validate(), Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_empty_cluster_seeds() {
        let config = RegistryConfig::default().with_cluster(vec![]);
        assert!(matches!(config.validate(), Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn retry_policy_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(350),
            max_retries: 10,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350)); // capped from 400
    }
}
