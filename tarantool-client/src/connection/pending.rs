//! Table of in-flight calls keyed by sync id.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::call::Call;

const SHARD_COUNT: usize = 16;

/// Concurrent map from sync id to outstanding call.
///
/// Sharded by sync id so that submitting tasks and the reader rarely
/// contend on the same lock. An entry is removed at the moment its call is
/// resolved, so the table holds exactly the requests awaiting a response.
#[derive(Debug)]
pub(crate) struct PendingCalls {
    shards: Vec<Mutex<HashMap<u64, Call>>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, sync_id: u64) -> &Mutex<HashMap<u64, Call>> {
        &self.shards[(sync_id % SHARD_COUNT as u64) as usize]
    }

    /// Registers a call. A call already registered under the same sync id is
    /// returned to the caller.
    pub(crate) fn register(&self, call: Call) -> Option<Call> {
        let mut shard = self.shard(call.sync_id()).lock().unwrap_or_else(PoisonError::into_inner);
        shard.insert(call.sync_id(), call)
    }

    /// Removes and returns the call registered under `sync_id`.
    pub(crate) fn resolve(&self, sync_id: u64) -> Option<Call> {
        self.shard(sync_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&sync_id)
    }

    /// Removes and returns every registered call.
    pub(crate) fn drain(&self) -> Vec<Call> {
        let mut drained = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
            drained.extend(shard.drain().map(|(_, call)| call));
        }
        drained
    }

    /// Returns the number of registered calls.
    pub(crate) fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }
}
