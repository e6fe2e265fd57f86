//! redis-pool-manager
//!
//! A client-side connection pool manager for a Redis-compatible
//! key-value server, supporting both single-node and cluster dispatch.
//!
//! # Features
//!
//! - Per-node connection pooling with bounded growth and idle shrinkage
//! - Background health checking and automatic repair of failed connections
//! - Async/await API using tokio, backed by the `redis` crate
//! - Exponential backoff on readiness waits
//! - Pluggable metrics via the `PoolMetrics` trait
//!
//! # Example
//!
//! ```ignore
//! use redis_pool_manager::{Registry, RegistryConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::new(RegistryConfig::default(), Arc::new(redis_pool_manager::NoopMetrics))?;
//!     registry.add_node("redis://127.0.0.1:6379").await?;
//!     redis_pool_manager::start_background_loops(&registry);
//!
//!     let timeout = std::time::Duration::from_secs(2);
//!     let mut client = registry.get_client("redis://127.0.0.1:6379", timeout).await?;
//!     let _: () = redis::cmd("PING").query_async(client.client()).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cleanup_loop;
pub mod config;
pub mod connection;
pub mod error;
pub mod health_loop;
pub mod metrics;
pub mod node;
pub mod pool;
pub mod registry;

pub use config::{ConnectionMode, LogConfig, LogFormat, LogLevel, RegistryConfig, RetryPolicy};
#[cfg(any(test, feature = "test-util"))]
pub use config::FakeTransport;
pub use connection::{Connection, ConnectionHandle};
pub use error::PoolError;
pub use metrics::{CountingMetrics, NodeCounterSnapshot, NoopMetrics, PoolMetrics};
pub use node::{NodeEntry, NodeStatus};
pub use pool::{Pool, PooledClient};
pub use registry::{start_background_loops, stop_background_loops, NodeStatusReport, PoolStatusReport, Registry};

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PoolError>;
