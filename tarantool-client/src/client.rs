//! Single-endpoint client entry point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tarantool_core::protocol::Request;
use tarantool_core::{Result, TarantoolError};
use tokio::sync::broadcast;

use crate::config::ClientConfig;
use crate::connection::{
    CallFuture, ConnectionEvent, ConnectionManager, ConnectionState, SingleSocketProvider,
    SocketProvider,
};
use crate::operations::Executor;

/// A client connected to one Tarantool instance.
///
/// The client keeps a single connection alive, reconnecting in the background
/// when it fails. Calls in flight when a connection fails are completed with
/// the failure; they are not retried. Use [`ClusterClient`](crate::ClusterClient)
/// for retrying transient failures.
///
/// # Example
///
/// ```ignore
/// use tarantool_client::{ClientConfig, ExecutorExt, TarantoolClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::builder()
///         .add_address("127.0.0.1:3301".parse()?)
///         .credentials("guest", "")
///         .build()?;
///
///     let client = TarantoolClient::connect(config).await?;
///     client.insert(512, vec![1.into(), "hello".into()]).await?;
///     let tuples = client.select(512, 0, vec![1.into()], 0, 1, Default::default()).await?;
///     println!("{}", tuples);
///
///     client.close();
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct TarantoolClient {
    manager: ConnectionManager,
}

impl TarantoolClient {
    /// Connects to the first configured address.
    ///
    /// Waits up to the init timeout for the first session.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No connection is established within the init timeout
    /// - The socket provider gives up reconnecting
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let address = *config.network().addresses().first().ok_or_else(|| {
            TarantoolError::Configuration("no server address configured".to_string())
        })?;
        let provider = SingleSocketProvider::new(
            address,
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
        let manager = ConnectionManager::start(config, provider, false).await?;
        tracing::info!(version = ?manager.server_version(), "connected to Tarantool");
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

    /// Returns the server version from the greeting.
    pub fn server_version(&self) -> Option<String> {
        self.manager.server_version()
    }

    /// Returns the number of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.manager.pending_count()
    }

    /// Closes the client. Pending calls fail with a closed error.
    pub fn close(&self) {
        self.manager.close();
    }
}

#[async_trait]
impl Executor for TarantoolClient {
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
