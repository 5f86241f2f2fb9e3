//! Chunked upload session.
//!
//! Drives one transfer through its states:
//!
//! ```text
//! Idle -> SessionNegotiating -> SessionOpen -> Transmitting -> Completed
//!                         \             \            \-> Cancelled | Failed
//! ```
//!
//! Chunks go out strictly in source order, one request at a time.
//! Cancellation is polled before negotiation and at every chunk boundary; a
//! cancelled transfer tears its backend session down exactly once.

use bytes::Bytes;
use driverelay_drive::{ChunkStatus, FileMetadata, ResumableSession, UploadedFile};
use driverelay_transfer::{Chunk, Transfer, TransferError, TransferState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::StorageBackend;
use crate::error::RelayError;
use crate::progress::StatusReporter;
use crate::source::ChunkSource;

pub struct UploadSession<'a> {
    backend: &'a dyn StorageBackend,
    transfer: &'a Transfer,
    cancel: CancellationToken,
    reporter: Option<&'a StatusReporter>,
}

impl<'a> UploadSession<'a> {
    pub fn new(
        backend: &'a dyn StorageBackend,
        transfer: &'a Transfer,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            transfer,
            cancel,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: &'a StatusReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Uploads everything `source` yields under `metadata`.
    ///
    /// On return the transfer is in a terminal state matching the result.
    pub async fn run(
        self,
        metadata: &FileMetadata,
        mut source: ChunkSource,
    ) -> Result<Option<UploadedFile>, RelayError> {
        let result = self.upload(metadata, &mut source).await;
        settle(self.transfer, &result);
        result
    }

    async fn upload(
        &self,
        metadata: &FileMetadata,
        source: &mut ChunkSource,
    ) -> Result<Option<UploadedFile>, RelayError> {
        self.checkpoint()?;

        self.transfer.set_state(TransferState::SessionNegotiating)?;
        let session = self
            .backend
            .open_session(metadata)
            .await
            .map_err(|e| RelayError::SessionNegotiationFailed(e.to_string()))?;
        self.transfer.set_state(TransferState::SessionOpen)?;
        info!(
            transfer_id = %self.transfer.id(),
            file = %metadata.name,
            total = self.transfer.total_bytes(),
            "upload session opened"
        );

        match self.transmit(&session, source).await {
            Err(RelayError::Cancelled) => {
                self.teardown(&session).await;
                Err(RelayError::Cancelled)
            }
            other => other,
        }
    }

    async fn transmit(
        &self,
        session: &ResumableSession,
        source: &mut ChunkSource,
    ) -> Result<Option<UploadedFile>, RelayError> {
        let total = self.transfer.total_bytes();
        self.transfer.set_state(TransferState::Transmitting)?;

        if total == 0 {
            self.checkpoint()?;
            let chunk = Chunk::new(0, Bytes::new());
            return match self.send(session, &chunk, total).await? {
                ChunkStatus::Complete(file) => Ok(file),
                ChunkStatus::Incomplete { .. } => Err(RelayError::ChunkUploadFailed {
                    offset: 0,
                    message: "backend expects data for an empty upload".into(),
                }),
            };
        }

        loop {
            self.checkpoint()?;
            let Some(chunk) = source.next_chunk().await? else {
                return Err(RelayError::SourceUnavailable(format!(
                    "stream ended after {} of {total} bytes",
                    source.offset()
                )));
            };
            if chunk.end() > total {
                return Err(TransferError::SizeExceeded {
                    declared: total,
                    attempted: chunk.end(),
                }
                .into());
            }
            self.checkpoint()?;

            let last = chunk.end() == total;
            match (self.send(session, &chunk, total).await?, last) {
                (ChunkStatus::Complete(file), true) => {
                    self.advance(&chunk)?;
                    return Ok(file);
                }
                (ChunkStatus::Incomplete { persisted }, false) => {
                    if let Some(persisted) = persisted.filter(|p| *p < chunk.end()) {
                        return Err(RelayError::ChunkUploadFailed {
                            offset: chunk.offset,
                            message: format!(
                                "backend persisted {persisted} of {} bytes",
                                chunk.end()
                            ),
                        });
                    }
                    self.advance(&chunk)?;
                }
                (ChunkStatus::Complete(_), false) => {
                    return Err(RelayError::ChunkUploadFailed {
                        offset: chunk.offset,
                        message: "backend finalized the upload before the last chunk".into(),
                    });
                }
                (ChunkStatus::Incomplete { .. }, true) => {
                    return Err(RelayError::ChunkUploadFailed {
                        offset: chunk.offset,
                        message: "backend did not finalize the upload after the last chunk"
                            .into(),
                    });
                }
            }
        }
    }

    async fn send(
        &self,
        session: &ResumableSession,
        chunk: &Chunk,
        total: u64,
    ) -> Result<ChunkStatus, RelayError> {
        debug!(
            transfer_id = %self.transfer.id(),
            range = %chunk.content_range(total),
            "sending chunk"
        );
        self.backend
            .send_chunk(session, chunk, total)
            .await
            .map_err(|e| RelayError::ChunkUploadFailed {
                offset: chunk.offset,
                message: e.to_string(),
            })
    }

    fn advance(&self, chunk: &Chunk) -> Result<(), RelayError> {
        self.transfer.add_progress(chunk.len())?;
        if let Some(reporter) = self.reporter {
            reporter.report(&self.transfer.progress());
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), RelayError> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        Ok(())
    }

    async fn teardown(&self, session: &ResumableSession) {
        if let Err(e) = self.backend.abort_session(session).await {
            warn!(transfer_id = %self.transfer.id(), error = %e, "failed to abort upload session");
        }
    }
}

/// Moves `transfer` to the terminal state matching `result`.
pub(crate) fn settle<T>(transfer: &Transfer, result: &Result<T, RelayError>) {
    let settled = match result {
        Ok(_) => transfer.complete(),
        Err(RelayError::Cancelled) => transfer.cancel(),
        Err(e) => transfer.fail(&e.to_string()),
    };
    if let Err(e) = settled {
        debug!(transfer_id = %transfer.id(), error = %e, "transfer already settled");
    }
}
