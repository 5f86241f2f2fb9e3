use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TransferError;
use crate::progress::transfer_speed;

/// Stable identifier of one relay operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    /// Creates an id from the inbound event's own identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random id for hosts whose events carry none.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransferId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle of a transfer.
///
/// `Completed`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Idle,
    SessionNegotiating,
    SessionOpen,
    Transmitting,
    Completed,
    Cancelled,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SessionNegotiating => "session_negotiating",
            Self::SessionOpen => "session_open",
            Self::Transmitting => "transmitting",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A slice of the payload positioned within the declared total.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset of the first byte of `data`.
    pub offset: u64,
    pub data: Bytes,
}

impl Chunk {
    pub fn new(offset: u64, data: Bytes) -> Self {
        Self { offset, data }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.len()
    }

    /// Builds the `Content-Range` header value for this chunk.
    ///
    /// The header range is inclusive on both ends (`start-end/total`). An
    /// empty chunk produces `bytes */total`, which finalizes a zero-length
    /// upload.
    pub fn content_range(&self, total: u64) -> String {
        if self.is_empty() {
            format!("bytes */{total}")
        } else {
            format!("bytes {}-{}/{}", self.offset, self.end() - 1, total)
        }
    }
}

/// Serializable snapshot of a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub transfer_id: TransferId,
    pub file_name: String,
    pub state: TransferState,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// RFC 3339 start timestamp.
    pub started_at: String,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferProgress {
    /// Returns the completion percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0
    }

    /// Average speed in bytes per second since the transfer started.
    pub fn speed(&self) -> f64 {
        transfer_speed(
            self.transferred_bytes,
            Duration::from_millis(self.elapsed_ms),
        )
    }
}

/// One relay operation (thread-safe).
pub struct Transfer {
    inner: RwLock<TransferInner>,
}

struct TransferInner {
    id: TransferId,
    file_name: String,
    total_bytes: u64,
    transferred_bytes: u64,
    state: TransferState,
    started: Instant,
    started_at: DateTime<Utc>,
    error: Option<String>,
}

impl Transfer {
    /// Creates an idle transfer. `total_bytes` is fixed for its lifetime.
    pub fn new(id: TransferId, file_name: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            inner: RwLock::new(TransferInner {
                id,
                file_name: file_name.into(),
                total_bytes,
                transferred_bytes: 0,
                state: TransferState::Idle,
                started: Instant::now(),
                started_at: Utc::now(),
                error: None,
            }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TransferInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TransferInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restarts the clock. Called when the transfer leaves the admission
    /// queue so that waiting time does not count toward its speed.
    pub fn start(&self) {
        let mut t = self.write();
        t.started = Instant::now();
        t.started_at = Utc::now();
    }

    /// Moves to `to`. Terminal states cannot be left.
    pub fn set_state(&self, to: TransferState) -> Result<(), TransferError> {
        let mut t = self.write();
        if t.state.is_terminal() {
            return Err(TransferError::InvalidTransition { from: t.state, to });
        }
        t.state = to;
        Ok(())
    }

    /// Advances the transferred counter by `bytes` and returns the new value.
    ///
    /// The counter never passes the declared total; an overflowing update is
    /// rejected and leaves the counter untouched.
    pub fn add_progress(&self, bytes: u64) -> Result<u64, TransferError> {
        let mut t = self.write();
        let next = t.transferred_bytes + bytes;
        if next > t.total_bytes {
            return Err(TransferError::SizeExceeded {
                declared: t.total_bytes,
                attempted: next,
            });
        }
        t.transferred_bytes = next;
        Ok(next)
    }

    pub fn complete(&self) -> Result<(), TransferError> {
        self.set_state(TransferState::Completed)
    }

    pub fn cancel(&self) -> Result<(), TransferError> {
        self.set_state(TransferState::Cancelled)
    }

    /// Marks the transfer as failed and records the error text.
    pub fn fail(&self, err: &str) -> Result<(), TransferError> {
        let mut t = self.write();
        if t.state.is_terminal() {
            return Err(TransferError::InvalidTransition {
                from: t.state,
                to: TransferState::Failed,
            });
        }
        t.state = TransferState::Failed;
        t.error = Some(err.to_string());
        Ok(())
    }

    pub fn progress(&self) -> TransferProgress {
        let t = self.read();
        TransferProgress {
            transfer_id: t.id.clone(),
            file_name: t.file_name.clone(),
            state: t.state,
            total_bytes: t.total_bytes,
            transferred_bytes: t.transferred_bytes,
            started_at: t.started_at.to_rfc3339(),
            elapsed_ms: t.started.elapsed().as_millis() as u64,
            error: t.error.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.read().state.is_terminal()
    }

    pub fn id(&self) -> TransferId {
        self.read().id.clone()
    }

    pub fn file_name(&self) -> String {
        self.read().file_name.clone()
    }

    pub fn state(&self) -> TransferState {
        self.read().state
    }

    pub fn total_bytes(&self) -> u64 {
        self.read().total_bytes
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.read().transferred_bytes
    }

    pub fn error(&self) -> Option<String> {
        self.read().error.clone()
    }
}
