//! Relay flow: inbound byte stream to a resumable Drive upload.
//!
//! This crate holds the **business logic** of the relay. It has no chat
//! transport dependency: hosts hand in an [`InboundFile`] and implement
//! [`StatusSink`] for their status messages. Storage access goes through the
//! [`StorageBackend`] trait, with [`DriveBackend`] as the real implementation.
//!
//! # Pipeline
//!
//! 1. **Register** the transfer for cancellation
//! 2. **Admit** through the concurrency gate
//! 3. **Negotiate** a resumable session
//! 4. **Transmit** chunks in source order, polling for cancellation
//! 5. **Release** the admission slot and registry entry, then **report** the
//!    terminal outcome

pub mod backend;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod session;
pub mod sink;
pub mod source;
pub mod status;

#[cfg(test)]
mod testing;

pub use backend::{DriveBackend, StorageBackend};
pub use error::RelayError;
pub use orchestrator::{RelayOrchestrator, RelayOutcome, RelaySettings};
pub use progress::StatusReporter;
pub use session::UploadSession;
pub use sink::{SinkError, StatusKind, StatusSink, StatusUpdate};
pub use source::{ByteStream, ChunkSource, InboundFile};
