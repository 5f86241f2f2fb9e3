use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::TransferId;

/// Table of cancellation tokens for in-flight transfers.
///
/// Clones share the same table: the orchestrator registers transfers while
/// control handlers (a "cancel" button, Ctrl-C) cancel them by id. Lookups for
/// unknown ids are no-ops, so a cancel arriving after completion is harmless.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    next_seq: u64,
    entries: HashMap<TransferId, Slot>,
}

struct Slot {
    seq: u64,
    token: CancellationToken,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `id` with a fresh token.
    ///
    /// The entry lives as long as the returned guard. Registering an id that
    /// is already present replaces its token.
    pub fn register(&self, id: TransferId) -> RegistryEntry {
        let token = CancellationToken::new();
        let seq = {
            let mut inner = self.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.insert(
                id.clone(),
                Slot {
                    seq,
                    token: token.clone(),
                },
            );
            seq
        };
        debug!(transfer_id = %id, "cancellation entry registered");
        RegistryEntry {
            registry: self.clone(),
            id,
            seq,
            token,
        }
    }

    /// Requests cancellation of `id`.
    ///
    /// Returns `true` if a live entry existed. Repeated calls are harmless.
    pub fn cancel(&self, id: &TransferId) -> bool {
        match self.lock().entries.get(id) {
            Some(slot) => {
                slot.token.cancel();
                debug!(transfer_id = %id, "cancellation requested");
                true
            }
            None => {
                debug!(transfer_id = %id, "cancel for unknown transfer ignored");
                false
            }
        }
    }

    /// Cancels every registered transfer and returns how many there were.
    pub fn cancel_all(&self) -> usize {
        let inner = self.lock();
        for slot in inner.entries.values() {
            slot.token.cancel();
        }
        inner.entries.len()
    }

    pub fn is_registered(&self, id: &TransferId) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Returns `false` for unknown ids.
    pub fn is_cancelled(&self, id: &TransferId) -> bool {
        self.lock()
            .entries
            .get(id)
            .is_some_and(|slot| slot.token.is_cancelled())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn remove(&self, id: &TransferId, seq: u64) {
        let mut inner = self.lock();
        // Leave a newer registration under the same id alone.
        if inner.entries.get(id).is_some_and(|slot| slot.seq == seq) {
            inner.entries.remove(id);
        }
    }
}

/// Registry membership of one transfer. Dropping it removes the entry.
pub struct RegistryEntry {
    registry: CancellationRegistry,
    id: TransferId,
    seq: u64,
    token: CancellationToken,
}

impl RegistryEntry {
    pub fn id(&self) -> &TransferId {
        &self.id
    }

    /// The token the upload session polls.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for RegistryEntry {
    fn drop(&mut self) {
        self.registry.remove(&self.id, self.seq);
        debug!(transfer_id = %self.id, "cancellation entry removed");
    }
}
