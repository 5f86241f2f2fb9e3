//! Relay error types.

use driverelay_transfer::TransferError;

/// Terminal failures of a relay.
///
/// `Cancelled` is a deliberate outcome rather than a fault; the orchestrator
/// reports it separately from the other variants.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("session negotiation failed: {0}")]
    SessionNegotiationFailed(String),

    #[error("chunk upload failed at byte {offset}: {message}")]
    ChunkUploadFailed { offset: u64, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
}
