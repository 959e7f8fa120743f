//! Synchronous facade over the async clients.
//!
//! [`BlockingClient`] owns a multi-threaded Tokio runtime that runs the
//! connection tasks, and drives each operation to completion with
//! `block_on`. It must not be used from within an async context.

use std::time::Duration;

use tarantool_core::protocol::{IteratorType, Request};
use tarantool_core::{Result, Value};
use tokio::runtime::{Builder, Runtime};

use crate::client::TarantoolClient;
use crate::cluster::ClusterClient;
use crate::config::ClientConfig;
use crate::connection::{CallFuture, ConnectionState};
use crate::operations::{Executor, ExecutorExt};

fn build_runtime() -> Result<Runtime> {
    Ok(Builder::new_multi_thread()
        .enable_all()
        .thread_name("tarantool-io")
        .build()?)
}

/// A blocking client wrapping an async [`Executor`].
///
/// # Example
///
/// ```ignore
/// use tarantool_client::{BlockingClient, ClientConfig};
///
/// let client = BlockingClient::connect(ClientConfig::default())?;
/// client.ping()?;
/// let reply = client.eval("return ...", vec![1.into(), 2.into()])?;
/// ```
#[derive(Debug)]
pub struct BlockingClient<C = TarantoolClient> {
    // Dropped before the runtime so close runs while the tasks still exist.
    client: C,
    runtime: Runtime,
}

impl BlockingClient<TarantoolClient> {
    /// Connects a single-endpoint client.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let runtime = build_runtime()?;
        let client = runtime.block_on(TarantoolClient::connect(config))?;
        Ok(Self { client, runtime })
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    /// Returns the number of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.client.pending_count()
    }

    /// Closes the client.
    pub fn close(&self) {
        self.client.close();
    }
}

impl BlockingClient<ClusterClient> {
    /// Connects a multi-endpoint client with transient-failure retry.
    pub fn connect_cluster(config: ClientConfig) -> Result<Self> {
        let runtime = build_runtime()?;
        let client = runtime.block_on(ClusterClient::connect(config))?;
        Ok(Self { client, runtime })
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    /// Returns the number of calls waiting for a reconnect.
    pub fn queued_retry_count(&self) -> usize {
        self.client.queued_retry_count()
    }

    /// Closes the client.
    pub fn close(&self) {
        self.client.close();
    }
}

impl<C: Executor> BlockingClient<C> {
    /// Returns the wrapped async client.
    pub fn get_ref(&self) -> &C {
        &self.client
    }

    /// Submits a request without waiting for the response.
    pub fn submit(&self, request: Request) -> CallFuture {
        self.runtime.block_on(self.client.exec(request))
    }

    /// Waits for a previously submitted call.
    pub fn wait(&self, call: &CallFuture, timeout: Option<Duration>) -> Result<Value> {
        match timeout {
            Some(timeout) => self.runtime.block_on(call.get_timeout(timeout)),
            None => self.runtime.block_on(call.get()),
        }
    }

    /// Submits a request and waits for its result.
    pub fn execute(&self, request: Request) -> Result<Value> {
        self.runtime.block_on(self.client.execute(request))
    }

    /// Selects tuples from `space` through `index`.
    pub fn select(
        &self,
        space: u32,
        index: u32,
        key: Vec<Value>,
        offset: u32,
        limit: u32,
        iterator: IteratorType,
    ) -> Result<Value> {
        self.runtime
            .block_on(self.client.select(space, index, key, offset, limit, iterator))
    }

    /// Inserts a tuple.
    pub fn insert(&self, space: u32, tuple: Vec<Value>) -> Result<Value> {
        self.runtime.block_on(self.client.insert(space, tuple))
    }

    /// Inserts or replaces a tuple.
    pub fn replace(&self, space: u32, tuple: Vec<Value>) -> Result<Value> {
        self.runtime.block_on(self.client.replace(space, tuple))
    }

    /// Updates the tuple matching `key`.
    pub fn update(&self, space: u32, index: u32, key: Vec<Value>, ops: Vec<Value>) -> Result<Value> {
        self.runtime
            .block_on(self.client.update(space, index, key, ops))
    }

    /// Inserts `tuple` or applies `ops` to the existing tuple.
    pub fn upsert(&self, space: u32, tuple: Vec<Value>, ops: Vec<Value>) -> Result<Value> {
        self.runtime.block_on(self.client.upsert(space, tuple, ops))
    }

    /// Deletes the tuple matching `key`.
    pub fn delete(&self, space: u32, index: u32, key: Vec<Value>) -> Result<Value> {
        self.runtime.block_on(self.client.delete(space, index, key))
    }

    /// Calls a stored procedure.
    pub fn call(&self, function: &str, args: Vec<Value>) -> Result<Value> {
        self.runtime.block_on(self.client.call(function, args))
    }

    /// Evaluates a Lua expression.
    pub fn eval(&self, expression: &str, args: Vec<Value>) -> Result<Value> {
        self.runtime.block_on(self.client.eval(expression, args))
    }

    /// Round-trips a ping.
    pub fn ping(&self) -> Result<()> {
        self.runtime.block_on(self.client.ping())
    }
}
