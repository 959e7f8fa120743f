//! One established socket: its write path and its I/O tasks.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tarantool_core::{Result, TarantoolError};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::write_buffer::WriteBuffer;
use crate::config::NetworkConfig;

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An established, authenticated socket.
///
/// Frames reach the socket through one of two paths: small frames are queued
/// in the shared [`WriteBuffer`] and flushed by the writer task, frames larger
/// than the direct-write threshold are written by the submitting task. Both
/// paths hold the same writer lock while writing, so frames never interleave.
#[derive(Debug)]
pub(crate) struct Session {
    id: ConnectionId,
    address: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    buffer: WriteBuffer,
    direct_write_threshold: usize,
    tasks: StdMutex<Option<Vec<JoinHandle<()>>>>,
}

impl Session {
    pub(crate) fn new(address: SocketAddr, writer: OwnedWriteHalf, network: &NetworkConfig) -> Self {
        Self {
            id: ConnectionId::new(),
            address,
            writer: Mutex::new(writer),
            buffer: WriteBuffer::new(network.shared_buffer_size()),
            direct_write_threshold: network.direct_write_threshold(),
            tasks: StdMutex::new(Some(Vec::new())),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns true if a frame of `len` bytes skips the shared buffer.
    pub(crate) fn is_direct_write(&self, len: usize) -> bool {
        len > self.direct_write_threshold
    }

    /// Sends one encoded frame.
    ///
    /// Waiting for buffer space or for the writer lock is bounded by
    /// `timeout` and fails with a timeout error. A direct write that stalls
    /// after it started fails with a communication error, since a partial
    /// frame leaves the stream unusable.
    pub(crate) async fn send(&self, frame: &[u8], timeout: Duration) -> Result<()> {
        if let Some(err) = self.buffer.closed_error() {
            return Err(err);
        }

        if !self.is_direct_write(frame.len()) {
            return self.buffer.offer(frame, timeout).await;
        }

        let mut writer = tokio::time::timeout(timeout, self.writer.lock())
            .await
            .map_err(|_| {
                TarantoolError::Timeout(format!("writer lock not acquired within {:?}", timeout))
            })?;
        tracing::trace!(conn = %self.id, bytes = frame.len(), "direct write");
        tokio::time::timeout(timeout, writer.write_all(frame))
            .await
            .map_err(|_| {
                TarantoolError::Communication(format!(
                    "direct write to {} stalled for {:?}",
                    self.address, timeout
                ))
            })??;
        Ok(())
    }

    /// Flushes queued bytes to the socket until the buffer is closed or a
    /// write fails.
    pub(crate) async fn write_loop(&self) -> Result<()> {
        loop {
            let batch = self.buffer.next_batch().await?;
            let mut writer = self.writer.lock().await;
            writer.write_all(&batch).await?;
        }
    }

    /// Hands the I/O task handles to the session. If the session has
    /// already been shut down the tasks are aborted immediately.
    pub(crate) fn attach(&self, handles: Vec<JoinHandle<()>>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        match tasks.as_mut() {
            Some(tasks) => tasks.extend(handles),
            None => handles.iter().for_each(JoinHandle::abort),
        }
    }

    /// Closes the write buffer with `err` and stops the I/O tasks.
    pub(crate) fn shutdown(&self, err: TarantoolError) {
        self.buffer.close(err);
        let handles = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        for handle in handles {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.buffer.queued_len()
    }
}
