//! Non-blocking status delivery.
//!
//! Each transfer gets one forwarder task that owns every call into the
//! status sink: the queued notice, progress edits and the terminal outcome,
//! in that order. Progress snapshots go through a latest-value-wins `watch`
//! slot, so a slow sink only drops intermediate updates. The relay itself
//! never waits on the sink while it holds an admission slot.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use driverelay_transfer::{ProgressThrottle, TransferProgress};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::sink::{StatusKind, StatusSink, StatusUpdate, deliver};
use crate::status::render_progress;

pub struct StatusReporter {
    progress: watch::Sender<Option<TransferProgress>>,
    notices: mpsc::UnboundedSender<StatusUpdate>,
    throttle: Mutex<ProgressThrottle>,
    forwarder: JoinHandle<()>,
}

impl StatusReporter {
    /// Spawns the forwarder task. Must be called inside a tokio runtime.
    ///
    /// In pure interval mode the forwarder also spaces sink calls, so two
    /// progress edits never start less than the interval apart even when a
    /// single delivery runs long.
    pub fn spawn(sink: Arc<dyn StatusSink>, throttle: ProgressThrottle) -> Self {
        let spacing = match throttle.min_bytes() {
            None => throttle.min_interval(),
            Some(_) => None,
        };
        let (progress, progress_rx) = watch::channel(None::<TransferProgress>);
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward(sink, progress_rx, notices_rx, spacing));
        Self {
            progress,
            notices,
            throttle: Mutex::new(throttle),
            forwarder,
        }
    }

    /// Queues a one-off message, such as the queued notice.
    pub fn notify(&self, update: StatusUpdate) {
        if self.notices.send(update).is_err() {
            debug!("status forwarder already stopped");
        }
    }

    /// Re-anchors the throttle at the moment bytes start to flow.
    pub fn start(&self) {
        let now = Instant::now().into_std();
        let mut throttle = self.throttle.lock().unwrap_or_else(PoisonError::into_inner);
        let (interval, min_bytes) = (throttle.min_interval(), throttle.min_bytes());
        *throttle = ProgressThrottle::new(interval, min_bytes, now);
    }

    /// Offers a snapshot. Returns `true` if it passed the throttle and was
    /// published for delivery.
    pub fn report(&self, progress: &TransferProgress) -> bool {
        let now = Instant::now().into_std();
        let due = self
            .throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .should_emit(now, progress.transferred_bytes);
        if due {
            self.progress.send_replace(Some(progress.clone()));
        }
        due
    }

    /// Hands over the terminal message and stops accepting snapshots.
    ///
    /// A progress snapshot still waiting for delivery is dropped; the outcome
    /// is always the last call into the sink. Awaiting the returned handle
    /// waits for that call to finish.
    pub fn finish(self, outcome: StatusUpdate) -> JoinHandle<()> {
        let Self {
            progress,
            notices,
            forwarder,
            ..
        } = self;
        if notices.send(outcome).is_err() {
            debug!("status forwarder already stopped");
        }
        drop(progress);
        forwarder
    }
}

async fn forward(
    sink: Arc<dyn StatusSink>,
    mut progress: watch::Receiver<Option<TransferProgress>>,
    mut notices: mpsc::UnboundedReceiver<StatusUpdate>,
    spacing: Option<Duration>,
) {
    let mut progress_open = true;
    let mut last_progress: Option<Instant> = None;

    loop {
        let ready_at = match (last_progress, spacing) {
            (Some(last), Some(spacing)) => last + spacing,
            _ => Instant::now(),
        };

        tokio::select! {
            biased;
            notice = notices.recv() => {
                let Some(update) = notice else { break };
                deliver(sink.as_ref(), &update).await;
                if update.kind == StatusKind::Outcome {
                    break;
                }
            }
            changed = next_snapshot(&mut progress, ready_at), if progress_open => {
                if changed.is_err() {
                    progress_open = false;
                    continue;
                }
                let update = progress.borrow_and_update().as_ref().map(|snapshot| {
                    StatusUpdate::new(
                        &snapshot.transfer_id,
                        StatusKind::Progress,
                        render_progress(snapshot),
                    )
                });
                if let Some(update) = update {
                    last_progress = Some(Instant::now());
                    deliver(sink.as_ref(), &update).await;
                }
            }
        }
    }
}

/// Waits for an unseen snapshot, then for the spacing window to open.
async fn next_snapshot(
    progress: &mut watch::Receiver<Option<TransferProgress>>,
    ready_at: Instant,
) -> Result<(), watch::error::RecvError> {
    progress.changed().await?;
    tokio::time::sleep_until(ready_at).await;
    Ok(())
}
