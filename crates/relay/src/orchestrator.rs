//! Relay orchestrator: one call per inbound file.
//!
//! Every relay registers for cancellation, waits for an admission slot,
//! runs its upload session and publishes exactly one terminal status. The
//! registry entry and the admission permit are RAII guards, so both are
//! released on every exit path. Status messages go through a per-transfer
//! forwarder and never hold up admission.

use std::sync::Arc;
use std::time::Duration;

use driverelay_drive::{FileMetadata, UploadedFile};
use driverelay_transfer::{
    AdmissionGate, CancellationRegistry, ProgressThrottle, Transfer, TransferId, TransferState,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::StorageBackend;
use crate::error::RelayError;
use crate::progress::StatusReporter;
use crate::session::{UploadSession, settle};
use crate::sink::{StatusKind, StatusSink, StatusUpdate};
use crate::source::{ByteStream, ChunkSource, InboundFile};
use crate::status::{render_cancelled, render_error, render_queued, render_success};

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Destination folder. Empty places files in the root of the account.
    pub folder_id: String,
    /// Transfers allowed to upload at the same time (minimum 1).
    pub max_concurrent: usize,
    pub progress_interval: Option<Duration>,
    pub progress_min_bytes: Option<u64>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            folder_id: String::new(),
            max_concurrent: 1,
            progress_interval: Some(Duration::from_secs(2)),
            progress_min_bytes: None,
        }
    }
}

/// Terminal result of one relay.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOutcome {
    pub transfer_id: TransferId,
    pub file_name: String,
    pub state: TransferState,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    /// File resource returned by the backend on success, if it sent one.
    pub file: Option<UploadedFile>,
    pub error: Option<String>,
}

impl RelayOutcome {
    pub fn is_success(&self) -> bool {
        self.state == TransferState::Completed
    }
}

#[derive(Clone)]
pub struct RelayOrchestrator {
    backend: Arc<dyn StorageBackend>,
    sink: Arc<dyn StatusSink>,
    registry: CancellationRegistry,
    gate: AdmissionGate,
    settings: Arc<RelaySettings>,
}

impl RelayOrchestrator {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        sink: Arc<dyn StatusSink>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            backend,
            sink,
            registry: CancellationRegistry::new(),
            gate: AdmissionGate::new(settings.max_concurrent),
            settings: Arc::new(settings),
        }
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Requests cancellation of a live transfer. Unknown or finished ids are
    /// a no-op and return `false`.
    pub fn cancel(&self, id: &TransferId) -> bool {
        self.registry.cancel(id)
    }

    /// Closes admission and cancels every live transfer. Returns how many
    /// transfers were signalled.
    pub fn shutdown(&self) -> usize {
        self.gate.close();
        self.registry.cancel_all()
    }

    /// Relays one inbound file to the backend and reports the outcome.
    ///
    /// Never fails: every error ends up in the returned outcome and in the
    /// terminal status message. The admission slot and the registry entry
    /// are released as soon as the transfer settles; only then does this
    /// wait for the status sink to take the outcome.
    pub async fn relay(&self, inbound: InboundFile) -> RelayOutcome {
        let InboundFile {
            transfer_id,
            file_name,
            declared_size,
            stream,
        } = inbound;

        let entry = self.registry.register(transfer_id.clone());
        let transfer = Transfer::new(transfer_id.clone(), file_name.as_str(), declared_size);
        let reporter = StatusReporter::spawn(
            self.sink.clone(),
            ProgressThrottle::new(
                self.settings.progress_interval,
                self.settings.progress_min_bytes,
                tokio::time::Instant::now().into_std(),
            ),
        );
        info!(%transfer_id, file = %file_name, size = declared_size, "transfer queued");
        reporter.notify(StatusUpdate::new(
            &transfer_id,
            StatusKind::Queued,
            render_queued(&file_name),
        ));

        let token = entry.token();
        let admitted = tokio::select! {
            biased;
            _ = token.cancelled() => Err(RelayError::Cancelled),
            permit = self.gate.acquire() => permit.map_err(RelayError::from),
        };

        let result = match admitted {
            Ok(permit) => {
                transfer.start();
                reporter.start();
                let result = self.upload(&transfer, token, stream, &reporter).await;
                drop(permit);
                result
            }
            Err(e) => {
                let result = Err(e);
                settle(&transfer, &result);
                result
            }
        };
        drop(entry);

        let file = result.ok().flatten();
        let outcome = RelayOutcome {
            transfer_id: transfer_id.clone(),
            file_name,
            state: transfer.state(),
            transferred_bytes: transfer.transferred_bytes(),
            total_bytes: transfer.total_bytes(),
            file,
            error: transfer.error(),
        };

        let text = match outcome.state {
            TransferState::Completed => {
                info!(%transfer_id, bytes = outcome.transferred_bytes, "transfer completed");
                render_success(&outcome.file_name)
            }
            TransferState::Cancelled => {
                info!(%transfer_id, bytes = outcome.transferred_bytes, "transfer cancelled");
                render_cancelled(&outcome.file_name)
            }
            _ => {
                let message = outcome.error.as_deref().unwrap_or("unknown error");
                warn!(%transfer_id, error = %message, "transfer failed");
                render_error(message)
            }
        };

        let update = StatusUpdate::new(&transfer_id, StatusKind::Outcome, text);
        let delivered = reporter.finish(update);
        if let Err(e) = delivered.await {
            debug!(%transfer_id, error = %e, "status forwarder ended abnormally");
        }
        outcome
    }

    async fn upload(
        &self,
        transfer: &Transfer,
        token: CancellationToken,
        stream: ByteStream,
        reporter: &StatusReporter,
    ) -> Result<Option<UploadedFile>, RelayError> {
        let metadata = self.metadata(transfer.file_name());
        UploadSession::new(self.backend.as_ref(), transfer, token)
            .with_reporter(reporter)
            .run(&metadata, ChunkSource::new(stream))
            .await
    }

    fn metadata(&self, file_name: String) -> FileMetadata {
        if self.settings.folder_id.is_empty() {
            FileMetadata {
                name: file_name,
                parents: Vec::new(),
            }
        } else {
            FileMetadata::in_folder(file_name, self.settings.folder_id.as_str())
        }
    }
}
