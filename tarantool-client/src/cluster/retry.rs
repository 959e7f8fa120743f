//! Retry classification and the expiring retry queue.

use std::pin::pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tarantool_core::protocol::{
    ER_LOADING, ER_LOCAL_INSTANCE_ID_IS_READ_ONLY, ER_READONLY, ER_TIMEOUT,
};
use tarantool_core::TarantoolError;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::connection::Call;

/// Server error codes worth retrying on another attempt.
const TRANSIENT_SERVER_CODES: [u32; 4] = [
    ER_READONLY,
    ER_TIMEOUT,
    ER_LOADING,
    ER_LOCAL_INSTANCE_ID_IS_READ_ONLY,
];

/// Returns true if a call failing with `err` may succeed when retried.
///
/// Communication failures are always transient. Server errors are transient
/// only for read-only, timeout and loading conditions. Everything else,
/// including write-side timeouts, is final.
pub fn is_transient(err: &TarantoolError) -> bool {
    match err {
        TarantoolError::Communication(_) | TarantoolError::Io(_) => true,
        TarantoolError::Server { code, .. } => TRANSIENT_SERVER_CODES.contains(code),
        _ => false,
    }
}

#[derive(Debug)]
struct Entry {
    call: Call,
    error: TarantoolError,
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<Entry>,
    closed: Option<TarantoolError>,
}

/// Calls waiting for the next successful reconnect.
///
/// Each entry keeps the error that queued it, so an entry that expires is
/// failed with its original cause.
#[derive(Debug)]
pub(crate) struct RetryQueue {
    expiry: Duration,
    state: Mutex<State>,
    changed: Notify,
}

impl RetryQueue {
    pub(crate) fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            state: Mutex::new(State::default()),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns how long a call stays eligible for retry after submission.
    pub(crate) fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Queues `call`. If the queue is closed the call is failed with the
    /// close cause instead.
    pub(crate) fn push(&self, call: Call, error: TarantoolError) {
        let mut state = self.lock();
        if let Some(closed) = &state.closed {
            let closed = closed.clone();
            drop(state);
            call.complete(Err(closed));
            return;
        }
        tracing::debug!(sync = call.sync_id(), error = %error, "queued call for retry");
        state.entries.push(Entry { call, error });
        drop(state);
        self.changed.notify_one();
    }

    /// Removes every queued call.
    pub(crate) fn take_all(&self) -> Vec<(Call, TarantoolError)> {
        let entries = std::mem::take(&mut self.lock().entries);
        entries.into_iter().map(|e| (e.call, e.error)).collect()
    }

    /// Fails every call whose deadline is at or before `now`. Returns the
    /// number of calls failed.
    pub(crate) fn fail_expired(&self, now: Instant) -> usize {
        let expired: Vec<Entry> = {
            let mut state = self.lock();
            let (expired, live) = std::mem::take(&mut state.entries)
                .into_iter()
                .partition(|e| e.call.is_expired(now));
            state.entries = live;
            expired
        };
        let count = expired.len();
        for entry in expired {
            tracing::debug!(sync = entry.call.sync_id(), "retry deadline passed");
            entry.call.complete(Err(entry.error));
        }
        count
    }

    /// Returns the earliest deadline among queued calls.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.lock()
            .entries
            .iter()
            .filter_map(|e| e.call.deadline())
            .min()
    }

    /// Returns the number of queued calls.
    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Fails queued calls with `err` and rejects later pushes.
    pub(crate) fn close(&self, err: TarantoolError) {
        let entries = {
            let mut state = self.lock();
            state.closed.get_or_insert(err.clone());
            std::mem::take(&mut state.entries)
        };
        for entry in entries {
            entry.call.complete(Err(err.clone()));
        }
        self.changed.notify_one();
    }

    /// Fails queued calls as their deadlines pass. Runs until aborted.
    pub(crate) async fn sweep(&self) {
        loop {
            let mut changed = pin!(self.changed.notified());
            changed.as_mut().enable();

            match self.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {
                            self.fail_expired(Instant::now());
                        }
                        _ = changed => {}
                    }
                }
                None => changed.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tarantool_core::protocol::Request;

    fn comm() -> TarantoolError {
        TarantoolError::Communication("connection reset".into())
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&comm()));
        assert!(is_transient(&TarantoolError::from(std::io::Error::from(
            std::io::ErrorKind::BrokenPipe
        ))));
        for code in [7, 78, 116, 128] {
            assert!(is_transient(&TarantoolError::Server {
                code,
                message: String::new()
            }));
        }
        assert!(!is_transient(&TarantoolError::Server {
            code: 3,
            message: "Duplicate key exists".into()
        }));
        assert!(!is_transient(&TarantoolError::Timeout("buffer full".into())));
        assert!(!is_transient(&TarantoolError::Protocol("bad frame".into())));
        assert!(!is_transient(&TarantoolError::Closed("closed".into())));
    }

    #[tokio::test]
    async fn test_push_and_take_all() {
        let queue = RetryQueue::new(Duration::from_secs(1));
        let deadline = Instant::now() + queue.expiry();
        let (call, future) = Call::new(4, Request::ping(), Some(deadline));
        queue.push(call, comm());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_deadline(), Some(deadline));

        let taken = queue.take_all();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].0.sync_id(), 4);
        assert_eq!(queue.len(), 0);
        assert!(!future.is_done());
    }

    #[tokio::test]
    async fn test_fail_expired_uses_original_error() {
        let queue = RetryQueue::new(Duration::from_millis(100));
        let now = Instant::now();
        let (old, old_future) = Call::new(1, Request::ping(), Some(now));
        let (fresh, fresh_future) = Call::new(2, Request::ping(), Some(now + Duration::from_secs(5)));
        queue.push(old, comm());
        queue.push(fresh, comm());

        assert_eq!(queue.fail_expired(now), 1);
        assert!(old_future.get().await.unwrap_err().is_communication());
        assert!(!fresh_future.is_done());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_close_fails_everything_and_rejects_pushes() {
        let queue = RetryQueue::new(Duration::from_secs(1));
        let (call, future) = Call::new(1, Request::ping(), None);
        queue.push(call, comm());

        queue.close(TarantoolError::Closed("client closed".into()));
        assert!(matches!(future.get().await, Err(TarantoolError::Closed(_))));

        let (late, late_future) = Call::new(2, Request::ping(), None);
        queue.push(late, comm());
        assert_eq!(queue.len(), 0);
        assert!(matches!(late_future.get().await, Err(TarantoolError::Closed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_fails_at_deadline() {
        let queue = Arc::new(RetryQueue::new(Duration::from_millis(200)));
        let sweeper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.sweep().await })
        };

        let (call, future) = Call::new(1, Request::ping(), Some(Instant::now() + queue.expiry()));
        queue.push(call, comm());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!future.is_done());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(future.is_done());
        assert_eq!(queue.len(), 0);
        sweeper.abort();
    }
}
