use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::TransferError;

/// Counting gate bounding how many transfers relay at once.
///
/// Capacity 1 serializes transfers: a second caller waits in `acquire` until
/// the first permit is dropped. Waiters are served in FIFO order.
#[derive(Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(1)
    }
}

impl AdmissionGate {
    /// Creates a gate with `capacity` slots (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<AdmissionPermit, TransferError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| TransferError::AdmissionClosed)?;
        trace!(available = self.semaphore.available_permits(), "admission slot acquired");
        Ok(AdmissionPermit { _permit: permit })
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rejects all current and future `acquire` calls.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// An occupied admission slot.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}
