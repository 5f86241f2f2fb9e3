//! Google Drive resumable upload client.
//!
//! Implements the three requests of a resumable upload against the Drive v3
//! upload endpoint: session initiation, ranged chunk `PUT`s, and session
//! abort. Access tokens come from a [`TokenProvider`].

pub mod client;
pub mod token;
pub mod types;

pub use client::{Client, DEFAULT_UPLOAD_URL, Error};
pub use token::{StaticToken, TokenProvider};
pub use types::{ChunkStatus, FileMetadata, ResumableSession, UploadedFile};
