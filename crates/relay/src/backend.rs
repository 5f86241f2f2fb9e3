//! Storage backend trait and the Drive implementation.
//!
//! The upload session only sees [`StorageBackend`], which keeps the protocol
//! state machine testable with in-memory mocks.

use std::sync::Arc;

use driverelay_drive::{ChunkStatus, Client, Error, FileMetadata, ResumableSession, TokenProvider};
use driverelay_transfer::Chunk;
use futures_util::future::BoxFuture;
use tracing::debug;

/// The three calls of a resumable upload.
pub trait StorageBackend: Send + Sync {
    /// Negotiates a session for `metadata`.
    fn open_session<'a>(
        &'a self,
        metadata: &'a FileMetadata,
    ) -> BoxFuture<'a, Result<ResumableSession, Error>>;

    /// Sends one chunk of an upload whose declared size is `total`.
    fn send_chunk<'a>(
        &'a self,
        session: &'a ResumableSession,
        chunk: &'a Chunk,
        total: u64,
    ) -> BoxFuture<'a, Result<ChunkStatus, Error>>;

    /// Abandons the session.
    fn abort_session<'a>(&'a self, session: &'a ResumableSession) -> BoxFuture<'a, Result<(), Error>>;
}

/// [`StorageBackend`] over the Drive upload API.
///
/// A fresh bearer token is requested for every session.
pub struct DriveBackend {
    client: Client,
    tokens: Arc<dyn TokenProvider>,
}

impl DriveBackend {
    pub fn new(client: Client, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { client, tokens }
    }
}

impl StorageBackend for DriveBackend {
    fn open_session<'a>(
        &'a self,
        metadata: &'a FileMetadata,
    ) -> BoxFuture<'a, Result<ResumableSession, Error>> {
        Box::pin(async move {
            let token = self.tokens.token().await?;
            self.client.initiate(&token, metadata).await
        })
    }

    fn send_chunk<'a>(
        &'a self,
        session: &'a ResumableSession,
        chunk: &'a Chunk,
        total: u64,
    ) -> BoxFuture<'a, Result<ChunkStatus, Error>> {
        Box::pin(self.client.put_chunk(session, chunk, total))
    }

    fn abort_session<'a>(&'a self, session: &'a ResumableSession) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let status = self.client.abort(session).await?;
            debug!(status, "upload session aborted");
            Ok(())
        })
    }
}
