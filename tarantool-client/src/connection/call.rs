//! Call handles: single-assignment result slots shared between the caller
//! and the connection internals.

use std::fmt;
use std::time::Duration;

use tarantool_core::protocol::Request;
use tarantool_core::{Result, TarantoolError, Value};
use tokio::sync::watch;
use tokio::time::Instant;

type Slot = Option<Result<Value>>;

/// Handle to the eventual result of a submitted request.
///
/// The handle may be cloned; every clone observes the same result. Waiting
/// with a timeout does not cancel the request on the server.
#[derive(Clone)]
pub struct CallFuture {
    sync_id: u64,
    rx: watch::Receiver<Slot>,
}

impl CallFuture {
    /// Creates a pending handle together with the completer that resolves it.
    pub(crate) fn pending(sync_id: u64) -> (Completer, Self) {
        let (tx, rx) = watch::channel(None);
        (Completer { tx }, Self { sync_id, rx })
    }

    /// Creates a handle that is already resolved.
    pub fn ready(sync_id: u64, result: Result<Value>) -> Self {
        let (tx, rx) = watch::channel(Some(result));
        drop(tx);
        Self { sync_id, rx }
    }

    /// Returns the sync id the request was sent under.
    pub fn sync_id(&self) -> u64 {
        self.sync_id
    }

    /// Returns true once the call has completed.
    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Returns the result if the call has completed, without waiting.
    pub fn try_result(&self) -> Option<Result<Value>> {
        self.rx.borrow().clone()
    }

    /// Waits for the call to complete.
    pub async fn get(&self) -> Result<Value> {
        let mut rx = self.rx.clone();
        let outcome = rx.wait_for(Option::is_some).await.map(|slot| slot.clone());
        match outcome {
            Ok(Some(result)) => result,
            _ => Err(TarantoolError::Closed(format!(
                "call {} was dropped without a result",
                self.sync_id
            ))),
        }
    }

    /// Waits for the call to complete for at most `timeout`.
    ///
    /// On timeout the request stays in flight and the handle can be awaited again.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<Value> {
        tokio::time::timeout(timeout, self.get()).await.map_err(|_| {
            TarantoolError::Timeout(format!(
                "no response for call {} within {:?}",
                self.sync_id, timeout
            ))
        })?
    }
}

impl fmt::Debug for CallFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallFuture")
            .field("sync_id", &self.sync_id)
            .field("done", &self.is_done())
            .finish()
    }
}

/// Write side of a call handle. Accepts exactly one completion.
#[derive(Debug)]
pub(crate) struct Completer {
    tx: watch::Sender<Slot>,
}

impl Completer {
    /// Stores the result. Returns false if the call was already completed,
    /// in which case the stored result is left untouched.
    pub(crate) fn complete(&self, result: Result<Value>) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        })
    }
}

/// An outstanding request: the original arguments, the completer and the
/// retry deadline (only set when cluster retry is enabled).
#[derive(Debug)]
pub(crate) struct Call {
    sync_id: u64,
    request: Request,
    completer: Completer,
    deadline: Option<Instant>,
}

impl Call {
    pub(crate) fn new(sync_id: u64, request: Request, deadline: Option<Instant>) -> (Self, CallFuture) {
        let (completer, future) = CallFuture::pending(sync_id);
        let call = Self {
            sync_id,
            request,
            completer,
            deadline,
        };
        (call, future)
    }

    pub(crate) fn sync_id(&self) -> u64 {
        self.sync_id
    }

    pub(crate) fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true if the retry deadline has passed.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    /// Completes the call, logging a rejected second completion.
    pub(crate) fn complete(self, result: Result<Value>) {
        if !self.completer.complete(result) {
            tracing::warn!(sync = self.sync_id, "call completed twice, keeping first result");
        }
    }
}
