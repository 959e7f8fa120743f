//! Request submission traits shared by the plain and cluster clients.

use std::time::Duration;

use async_trait::async_trait;
use tarantool_core::protocol::{IteratorType, Request};
use tarantool_core::{Result, Value};

use crate::connection::CallFuture;

/// Submits framed requests and hands back call handles.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Submits `request`. The returned handle resolves with the `DATA` field
    /// of the response or with the failure.
    async fn exec(&self, request: Request) -> CallFuture;

    /// Default wait limit applied by [`ExecutorExt`] operations.
    fn operation_timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether [`ExecutorExt::call`] uses CALL or the legacy OLD_CALL.
    fn use_new_call(&self) -> bool {
        true
    }
}

/// Typed operations on top of [`Executor`], each waiting for the result.
#[async_trait]
pub trait ExecutorExt: Executor {
    /// Submits `request` and waits for its result, bounded by the operation timeout.
    async fn execute(&self, request: Request) -> Result<Value> {
        let call = self.exec(request).await;
        match self.operation_timeout() {
            Some(timeout) => call.get_timeout(timeout).await,
            None => call.get().await,
        }
    }

    /// Selects tuples from `space` through `index`.
    async fn select(
        &self,
        space: u32,
        index: u32,
        key: Vec<Value>,
        offset: u32,
        limit: u32,
        iterator: IteratorType,
    ) -> Result<Value> {
        self.execute(Request::select(space, index, key, offset, limit, iterator))
            .await
    }

    /// Inserts a tuple.
    async fn insert(&self, space: u32, tuple: Vec<Value>) -> Result<Value> {
        self.execute(Request::insert(space, tuple)).await
    }

    /// Inserts or replaces a tuple.
    async fn replace(&self, space: u32, tuple: Vec<Value>) -> Result<Value> {
        self.execute(Request::replace(space, tuple)).await
    }

    /// Updates the tuple matching `key` with update operations.
    async fn update(&self, space: u32, index: u32, key: Vec<Value>, ops: Vec<Value>) -> Result<Value> {
        self.execute(Request::update(space, index, key, ops)).await
    }

    /// Inserts `tuple` or applies `ops` to the existing tuple.
    async fn upsert(&self, space: u32, tuple: Vec<Value>, ops: Vec<Value>) -> Result<Value> {
        self.execute(Request::upsert(space, tuple, ops)).await
    }

    /// Deletes the tuple matching `key`.
    async fn delete(&self, space: u32, index: u32, key: Vec<Value>) -> Result<Value> {
        self.execute(Request::delete(space, index, key)).await
    }

    /// Calls a stored procedure.
    async fn call(&self, function: &str, args: Vec<Value>) -> Result<Value> {
        let request = if self.use_new_call() {
            Request::call(function, args)
        } else {
            Request::old_call(function, args)
        };
        self.execute(request).await
    }

    /// Evaluates a Lua expression.
    async fn eval(&self, expression: &str, args: Vec<Value>) -> Result<Value> {
        self.execute(Request::eval(expression, args)).await
    }

    /// Round-trips a ping.
    async fn ping(&self) -> Result<()> {
        self.execute(Request::ping()).await.map(|_| ())
    }
}

impl<T: Executor + ?Sized> ExecutorExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tarantool_core::protocol::RequestType;

    /// Records requests and answers each with its request type name.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Request>>,
        old_call: bool,
    }

    #[async_trait]
    impl Executor for Recorder {
        async fn exec(&self, request: Request) -> CallFuture {
            let reply = Value::from(request.request_type().to_string());
            self.seen.lock().unwrap().push(request);
            CallFuture::ready(1, Ok(reply))
        }

        fn use_new_call(&self) -> bool {
            !self.old_call
        }
    }

    #[tokio::test]
    async fn test_operations_build_requests() {
        let exec = Recorder::default();
        exec.insert(512, vec![1.into(), "hello".into()]).await.unwrap();
        exec.select(512, 0, vec![1.into()], 0, 1, IteratorType::Eq)
            .await
            .unwrap();
        exec.delete(512, 0, vec![1.into()]).await.unwrap();
        exec.ping().await.unwrap();

        let types: Vec<_> = exec
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.request_type())
            .collect();
        assert_eq!(
            types,
            vec![
                RequestType::Insert,
                RequestType::Select,
                RequestType::Delete,
                RequestType::Ping
            ]
        );
    }

    #[tokio::test]
    async fn test_call_respects_old_call_switch() {
        let exec = Recorder {
            old_call: true,
            ..Default::default()
        };
        let reply = exec.call("box.info", vec![]).await.unwrap();
        assert_eq!(reply, Value::from("OLD_CALL"));

        let exec = Recorder::default();
        let reply = exec.call("box.info", vec![]).await.unwrap();
        assert_eq!(reply, Value::from("CALL"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_honours_operation_timeout() {
        struct Silent;

        #[async_trait]
        impl Executor for Silent {
            async fn exec(&self, _request: Request) -> CallFuture {
                let (completer, future) = CallFuture::pending(1);
                // Keep the slot open so the caller times out instead of
                // observing a dropped call.
                std::mem::forget(completer);
                future
            }

            fn operation_timeout(&self) -> Option<Duration> {
                Some(Duration::from_millis(100))
            }
        }

        let err = Silent.ping().await.unwrap_err();
        assert!(matches!(err, tarantool_core::TarantoolError::Timeout(_)));
    }
}
