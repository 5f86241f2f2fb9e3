//! Request and response types for the Drive upload API.

use serde::{Deserialize, Serialize};

/// Metadata sent with the session-initiation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

impl FileMetadata {
    /// Metadata for `name` placed inside the folder `parent_id`.
    pub fn in_folder(name: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parents: vec![parent_id.into()],
        }
    }
}

/// A negotiated upload session.
///
/// The session URL authenticates subsequent chunk requests on its own; no
/// bearer token is needed after initiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumableSession {
    pub url: String,
}

/// File resource returned when an upload completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
}

/// Backend acknowledgement of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkStatus {
    /// `308 Resume Incomplete`: the session expects more bytes.
    ///
    /// `persisted` is the number of bytes the backend reports as stored
    /// (from the `Range` header), if it sent one.
    Incomplete { persisted: Option<u64> },
    /// `200`/`201`: the upload is finished.
    Complete(Option<UploadedFile>),
}

/// Parses a `Range: bytes=0-N` response header into a persisted byte count.
pub(crate) fn parse_persisted_range(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes=")?;
    let (start, end) = range.split_once('-')?;
    if start.trim() != "0" {
        return None;
    }
    end.trim().parse::<u64>().ok().map(|last| last + 1)
}
