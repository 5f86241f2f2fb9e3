//! Transfer bookkeeping for the relay: the per-transfer model, chunk framing,
//! progress math, cancellation registry and admission control.
//!
//! Nothing in this crate performs network I/O. The relay crate drives these
//! types from its upload session and orchestrator.

mod admission;
mod cancel;
mod progress;
mod types;

pub use admission::{AdmissionGate, AdmissionPermit};
pub use cancel::{CancellationRegistry, RegistryEntry};
pub use progress::{ProgressThrottle, transfer_speed};
pub use types::{Chunk, Transfer, TransferId, TransferProgress, TransferState};

/// Google Drive requires every non-final chunk to be a multiple of 256 KiB.
pub const CHUNK_ALIGNMENT: usize = 256 * 1024;

/// Default read size for file-backed sources: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * CHUNK_ALIGNMENT;

/// Rounds `size` down to a multiple of [`CHUNK_ALIGNMENT`], never below one
/// alignment unit. A size of 0 selects [`DEFAULT_CHUNK_SIZE`].
pub fn aligned_chunk_size(size: usize) -> usize {
    if size == 0 {
        return DEFAULT_CHUNK_SIZE;
    }
    (size / CHUNK_ALIGNMENT).max(1) * CHUNK_ALIGNMENT
}

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("chunk ends at byte {attempted} but the declared size is {declared}")]
    SizeExceeded { declared: u64, attempted: u64 },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: TransferState,
        to: TransferState,
    },

    #[error("admission gate closed")]
    AdmissionClosed,
}
