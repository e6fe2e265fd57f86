//! Error types for the connection pool manager.
//!
//! The taxonomy mirrors the failure modes a caller can actually observe:
//! readiness failures, probe failures, exhausted dispatch, and programmer
//! errors like addressing an unknown node.

use thiserror::Error;

/// The error type returned by every fallible pool manager operation.
#[derive(Error, Debug)]
pub enum PoolError {
    /// A connection could not be brought up within its readiness budget.
    #[error("connection to {url} not ready after {elapsed_ms}ms ({attempts} attempts)")]
    NotReady {
        /// The node URL that failed to become ready.
        url: String,
        /// Time spent waiting, in milliseconds.
        elapsed_ms: u64,
        /// Number of readiness attempts made.
        attempts: u32,
    },

    /// A single health probe failed.
    ///
    /// Never surfaced to a `get_client` caller; consumed internally by the
    /// pool and the health loop.
    #[error("health probe failed for {url}: {source}")]
    Unhealthy {
        /// The node URL the probe was issued against.
        url: String,
        /// The underlying transport error.
        #[source]
        source: redis::RedisError,
    },

    /// `get_client` could not obtain a borrow within its timeout.
    #[error("no healthy pool available for {url} after {timeout_ms}ms")]
    NoHealthyPools {
        /// The node URL that had no usable pool.
        url: String,
        /// The timeout budget that was exhausted.
        timeout_ms: u64,
    },

    /// The given URL has no registered node entry.
    #[error("unknown node: {url}")]
    UnknownNode {
        /// The URL that was not found in the registry.
        url: String,
    },

    /// The node is in the process of closing; new acquisitions are rejected.
    #[error("node {url} is closing")]
    NodeClosing {
        /// The node URL being closed.
        url: String,
    },

    /// `add_node` could not bring up the minimum required pool in time.
    #[error("add_node({url}) timed out after {timeout_ms}ms bringing up the minimum pool")]
    AddNodeTimeout {
        /// The node URL that failed to come up.
        url: String,
        /// The timeout budget that was exhausted.
        timeout_ms: u64,
    },

    /// The supplied configuration is internally inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A failure surfaced directly from the underlying client library.
    #[error("transport error: {0}")]
    Transport(#[from] redis::RedisError),
}

impl PoolError {
    /// Returns true if retrying the same operation might succeed.
    ///
    /// Used by the health loop and the dispatcher's wait-and-retry step to
    /// decide whether a failure is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::NotReady { .. } | PoolError::NoHealthyPools { .. } | PoolError::Transport(_)
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_display() {
        let err = PoolError::NotReady {
            url: "redis://a:6379".to_string(),
            elapsed_ms: 1500,
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "connection to redis://a:6379 not ready after 1500ms (3 attempts)"
        );
    }

    #[test]
    fn no_healthy_pools_display() {
        let err = PoolError::NoHealthyPools {
            url: "redis://a:6379".to_string(),
            timeout_ms: 100,
        };
        assert_eq!(
            err.to_string(),
            "no healthy pool available for redis://a:6379 after 100ms"
        );
    }

    #[test]
    fn unknown_node_display() {
        let err = PoolError::UnknownNode {
            url: "redis://missing:6379".to_string(),
        };
        assert_eq!(err.to_string(), "unknown node: redis://missing:6379");
    }

    #[test]
    fn retryable_classification() {
        assert!(PoolError::NotReady {
            url: "x".into(),
            elapsed_ms: 0,
            attempts: 0,
        }
        .is_retryable());
        assert!(PoolError::NoHealthyPools {
            url: "x".into(),
            timeout_ms: 0,
        }
        .is_retryable());
        assert!(!PoolError::UnknownNode { url: "x".into() }.is_retryable());
        assert!(!PoolError::NodeClosing { url: "x".into() }.is_retryable());
        assert!(!PoolError::InvalidConfig("bad".into()).is_retryable());
    }
}
