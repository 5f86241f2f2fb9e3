//! Status sink that writes status messages to the log.

use driverelay_relay::{SinkError, StatusKind, StatusSink, StatusUpdate};
use futures_util::future::BoxFuture;

pub struct LogSink;

impl StatusSink for LogSink {
    fn update<'a>(&'a self, update: &'a StatusUpdate) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            let text = update.text.replace('\n', " | ");
            let cancellable = update.cancel_affordance.is_some();
            match update.kind {
                StatusKind::Queued | StatusKind::Progress => {
                    tracing::info!(transfer_id = %update.transfer_id, cancellable, "{text}")
                }
                StatusKind::Outcome => tracing::info!(transfer_id = %update.transfer_id, "{text}"),
            }
            Ok(())
        })
    }
}
