//! Async Rust client for [Tarantool](https://www.tarantool.io/) over the IPROTO binary protocol.
//!
//! Requests from any number of tasks are multiplexed over one TCP connection
//! and matched to responses by sync id, so replies may arrive in any order.
//! Small frames are batched through a shared write buffer flushed by a
//! dedicated writer task; large frames bypass the buffer and are written by
//! the submitting task. A background reconnector replaces failed connections.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tarantool_client::{ClientConfig, ExecutorExt, IteratorType, TarantoolClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .add_address("127.0.0.1:3301".parse()?)
//!         .credentials("app", "secret")
//!         .build()?;
//!     let client = TarantoolClient::connect(config).await?;
//!
//!     client.replace(512, vec![1.into(), "one".into()]).await?;
//!     let tuples = client
//!         .select(512, 0, vec![1.into()], 0, 10, IteratorType::Eq)
//!         .await?;
//!     println!("{}", tuples);
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! # Clients
//!
//! | Type | Endpoints | On connection failure |
//! |------|-----------|-----------------------|
//! | [`TarantoolClient`] | first configured address | in-flight calls fail |
//! | [`ClusterClient`] | all addresses, round-robin | transient failures are retried until the operation expiry |
//! | [`BlockingClient`] | either of the above | same as the wrapped client |
//!
//! Every client implements [`Executor`], which returns a [`CallFuture`]
//! without waiting for the response. [`ExecutorExt`] adds typed operations
//! that wait for the result.
//!
//! # Configuration
//!
//! ```rust,no_run
//! use tarantool_client::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .add_address("10.0.0.1:3301".parse().unwrap())
//!     .add_address("10.0.0.2:3301".parse().unwrap())
//!     .shared_buffer_size(4 * 1024 * 1024)
//!     .direct_write_factor(0.25)
//!     .write_timeout(Duration::from_secs(5))
//!     .operation_expiry(Duration::from_secs(1))
//!     .retry(|r| r
//!         .initial_backoff(Duration::from_millis(50))
//!         .max_backoff(Duration::from_secs(5)))
//!     .build()
//!     .expect("invalid config");
//! ```
//!
//! Configuration can also be read from `TARANTOOL_*` environment variables
//! with [`ClientConfig::from_env`], or from TOML with the `config-file` feature.
//!
//! # Feature Flags
//!
//! | Flag | Purpose |
//! |------|---------|
//! | `config-file` | `ClientConfig::from_toml` via `serde` and `toml` |

#![warn(missing_docs)]

pub mod blocking;
mod client;
pub mod cluster;
pub mod config;
mod config_file;
pub mod connection;
mod operations;

pub use blocking::BlockingClient;
pub use client::TarantoolClient;
pub use cluster::{is_transient, ClusterClient};
pub use config::{
    ClientConfig, ClientConfigBuilder, ClusterConfig, ClusterConfigBuilder, ConfigError,
    NetworkConfig, NetworkConfigBuilder, RetryConfig, RetryConfigBuilder, SecurityConfig,
    SecurityConfigBuilder,
};
pub use config_file::{
    FileClusterConfig, FileConfig, FileNetworkConfig, FileRetryConfig, FileSecurityConfig,
};
pub use connection::{
    CallFuture, ConnectionEvent, ConnectionId, ConnectionManager, ConnectionState,
    RoundRobinSocketProvider, SingleSocketProvider, SocketProvider,
};
pub use operations::{Executor, ExecutorExt};
pub use tarantool_core as core;
pub use tarantool_core::protocol::{IteratorType, Request};
pub use tarantool_core::{Result, TarantoolError, Value};
