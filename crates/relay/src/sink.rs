//! Status sink: where user-facing status messages go.

use driverelay_transfer::TransferId;
use futures_util::future::BoxFuture;
use tracing::debug;

/// What a status message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Waiting for an admission slot.
    Queued,
    Progress,
    /// Terminal outcome: success, failure or cancellation.
    Outcome,
}

/// One status message for the user who sent a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub transfer_id: TransferId,
    pub kind: StatusKind,
    pub text: String,
    /// Present while the transfer can still be cancelled. Hosts attach a
    /// cancel control that calls back with this id.
    pub cancel_affordance: Option<TransferId>,
}

impl StatusUpdate {
    pub(crate) fn new(transfer_id: &TransferId, kind: StatusKind, text: String) -> Self {
        let cancel_affordance = match kind {
            StatusKind::Outcome => None,
            StatusKind::Queued | StatusKind::Progress => Some(transfer_id.clone()),
        };
        Self {
            transfer_id: transfer_id.clone(),
            kind,
            text,
            cancel_affordance,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("status delivery failed: {0}")]
pub struct SinkError(pub String);

/// Host-side delivery of status messages.
///
/// Delivery failures never change the outcome of a relay.
pub trait StatusSink: Send + Sync {
    fn update<'a>(&'a self, update: &'a StatusUpdate) -> BoxFuture<'a, Result<(), SinkError>>;
}

/// Delivers `update`, logging and dropping any failure.
pub(crate) async fn deliver(sink: &dyn StatusSink, update: &StatusUpdate) {
    if let Err(e) = sink.update(update).await {
        debug!(transfer_id = %update.transfer_id, error = %e, "status update dropped");
    }
}
