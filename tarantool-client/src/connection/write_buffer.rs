//! Bounded byte queue between submitting tasks and the writer task.

use std::pin::pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use tarantool_core::{Result, TarantoolError};
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct Inner {
    buf: BytesMut,
    closed: Option<TarantoolError>,
}

/// Shared write buffer.
///
/// Producers append whole frames with [`offer`](Self::offer), waiting for
/// space up to the write timeout. The single writer task takes everything
/// queued with [`next_batch`](Self::next_batch). Frames are appended
/// atomically, so a batch always ends on a frame boundary.
#[derive(Debug)]
pub(crate) struct WriteBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    not_empty: Notify,
    space: Notify,
}

impl WriteBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: BytesMut::with_capacity(capacity),
                closed: None,
            }),
            capacity,
            not_empty: Notify::new(),
            space: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the error the buffer was closed with, if any.
    pub(crate) fn closed_error(&self) -> Option<TarantoolError> {
        self.lock().closed.clone()
    }

    /// Returns the number of queued bytes.
    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.lock().buf.len()
    }

    /// Appends a frame, waiting for space for at most `timeout`.
    pub(crate) async fn offer(&self, frame: &[u8], timeout: Duration) -> Result<()> {
        if frame.len() > self.capacity {
            return Err(TarantoolError::Protocol(format!(
                "frame of {} bytes does not fit the {} byte write buffer",
                frame.len(),
                self.capacity
            )));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let mut space = pin!(self.space.notified());
            space.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(err) = &inner.closed {
                    return Err(err.clone());
                }
                if inner.buf.len() + frame.len() <= self.capacity {
                    inner.buf.extend_from_slice(frame);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            if tokio::time::timeout_at(deadline, space).await.is_err() {
                return Err(TarantoolError::Timeout(format!(
                    "write buffer stayed full for {:?}",
                    timeout
                )));
            }
        }
    }

    /// Waits until bytes are queued, then takes all of them.
    pub(crate) async fn next_batch(&self) -> Result<BytesMut> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(err) = &inner.closed {
                    return Err(err.clone());
                }
                if !inner.buf.is_empty() {
                    let batch = inner.buf.split();
                    drop(inner);
                    self.space.notify_waiters();
                    return Ok(batch);
                }
            }
            self.not_empty.notified().await;
        }
    }

    /// Discards queued bytes and fails current and future producers with `err`.
    pub(crate) fn close(&self, err: TarantoolError) {
        {
            let mut inner = self.lock();
            inner.buf.clear();
            inner.closed.get_or_insert(err);
        }
        self.space.notify_waiters();
        self.not_empty.notify_one();
    }
}
