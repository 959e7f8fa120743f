//! Multi-endpoint client with retry of transient failures.

mod client;
mod retry;

pub use client::ClusterClient;
pub use retry::is_transient;

pub(crate) use retry::RetryQueue;
