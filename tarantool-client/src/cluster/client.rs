//! Client that rotates over several endpoints and retries transient failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tarantool_core::protocol::Request;
use tarantool_core::Result;
use tokio::sync::broadcast;

use crate::config::ClientConfig;
use crate::connection::{
    CallFuture, ConnectionEvent, ConnectionManager, ConnectionState, RoundRobinSocketProvider,
    SocketProvider,
};
use crate::operations::Executor;

/// A client for a set of interchangeable Tarantool instances.
///
/// Reconnection walks the configured addresses round-robin. A call that
/// fails with a communication error or with one of the transient server
/// errors (read-only, timeout, loading) is kept and resubmitted after the
/// next successful reconnect, until the configured operation expiry has
/// passed since it was first submitted. An expired call fails with the
/// error that last queued it.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use tarantool_client::{ClientConfig, ClusterClient, ExecutorExt};
///
/// let config = ClientConfig::builder()
///     .add_address("10.0.0.1:3301".parse()?)
///     .add_address("10.0.0.2:3301".parse()?)
///     .operation_expiry(Duration::from_secs(2))
///     .build()?;
///
/// let client = ClusterClient::connect(config).await?;
/// client.call("box.info", vec![]).await?;
/// ```
#[derive(Debug)]
pub struct ClusterClient {
    manager: ConnectionManager,
}

impl ClusterClient {
    /// Connects to the first reachable configured address.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let provider = RoundRobinSocketProvider::new(
            config.network().addresses().to_vec(),
            config.network().connect_timeout(),
            config.retry().clone(),
        );
        Self::connect_with(config, Arc::new(provider)).await
    }

    /// Connects using a custom socket provider.
    pub async fn connect_with(
        config: ClientConfig,
        provider: Arc<dyn SocketProvider>,
    ) -> Result<Self> {
        let manager = ConnectionManager::start(config, provider, true).await?;
        tracing::info!(
            version = ?manager.server_version(),
            expiry = ?manager.config().cluster().operation_expiry(),
            "connected to Tarantool cluster"
        );
        Ok(Self { manager })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        self.manager.config()
    }

    /// Returns the underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Returns true if a connection is established.
    pub fn is_alive(&self) -> bool {
        self.manager.is_alive()
    }

    /// Waits until a connection is established.
    pub async fn wait_alive(&self, timeout: Duration) -> Result<()> {
        self.manager.wait_alive(timeout).await
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.manager.subscribe()
    }

    /// Returns the last schema id reported by the server.
    pub fn schema_id(&self) -> Option<u64> {
        self.manager.schema_id()
    }

    /// Returns the server version from the latest greeting.
    pub fn server_version(&self) -> Option<String> {
        self.manager.server_version()
    }

    /// Returns the number of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.manager.pending_count()
    }

    /// Returns the number of calls waiting for a reconnect.
    pub fn queued_retry_count(&self) -> usize {
        self.manager.queued_retry_count()
    }

    /// Closes the client. Pending and queued calls fail with a closed error.
    pub fn close(&self) {
        self.manager.close();
    }
}

#[async_trait]
impl Executor for ClusterClient {
    async fn exec(&self, request: Request) -> CallFuture {
        self.manager.exec(request).await
    }

    fn operation_timeout(&self) -> Option<Duration> {
        self.manager.config().operation_timeout()
    }

    fn use_new_call(&self) -> bool {
        self.manager.config().use_new_call()
    }
}
