//! Inbound files and the chunk source that frames them.

use std::io;
use std::path::Path;

use bytes::{Bytes, BytesMut};
use driverelay_transfer::{CHUNK_ALIGNMENT, Chunk, TransferId, aligned_chunk_size};
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::RelayError;

/// Ordered byte stream of an inbound file.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// A file handed to the relay by the host.
pub struct InboundFile {
    pub transfer_id: TransferId,
    pub file_name: String,
    /// Size announced by the sender. Fixed for the lifetime of the transfer.
    pub declared_size: u64,
    pub stream: ByteStream,
}

impl InboundFile {
    pub fn new(
        transfer_id: TransferId,
        file_name: impl Into<String>,
        declared_size: u64,
        stream: ByteStream,
    ) -> Self {
        Self {
            transfer_id,
            file_name: file_name.into(),
            declared_size,
            stream,
        }
    }

    /// Opens a local file as an inbound file.
    ///
    /// The declared size is taken from the file metadata and the stream yields
    /// items of `chunk_size` bytes rounded to the upload alignment, so every
    /// item except the last is a valid non-final chunk.
    pub async fn from_path(
        transfer_id: TransferId,
        path: &Path,
        chunk_size: usize,
    ) -> io::Result<Self> {
        let file = File::open(path).await?;
        let declared_size = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let stream = file_stream(file, aligned_chunk_size(chunk_size));
        Ok(Self::new(transfer_id, file_name, declared_size, stream))
    }
}

fn file_stream(file: File, chunk_size: usize) -> ByteStream {
    stream::try_unfold(file, move |mut file| async move {
        let mut buf = vec![0u8; chunk_size];
        let mut filled = 0;
        while filled < chunk_size {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some((Bytes::from(buf), file)))
    })
    .boxed()
}

/// Frames an inbound stream into offset-tagged chunks.
///
/// Drive only persists whole multiples of [`CHUNK_ALIGNMENT`] from a non-final
/// chunk, so unaligned stream items are coalesced: every chunk but the last
/// is aligned, and the unaligned tail is held back until more bytes arrive
/// or the stream ends. Aligned items pass through without copying. Empty
/// items are skipped; a stream error ends the relay with
/// [`RelayError::SourceUnavailable`].
pub struct ChunkSource {
    stream: ByteStream,
    offset: u64,
    pending: BytesMut,
    exhausted: bool,
}

impl ChunkSource {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            offset: 0,
            pending: BytesMut::new(),
            exhausted: false,
        }
    }

    /// Returns the next non-empty chunk, or `None` at end of stream.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, RelayError> {
        while !self.exhausted && self.pending.len() < CHUNK_ALIGNMENT {
            match self.stream.next().await {
                None => self.exhausted = true,
                Some(Err(e)) => return Err(RelayError::SourceUnavailable(e.to_string())),
                Some(Ok(data)) if data.is_empty() => {}
                Some(Ok(data)) if self.pending.is_empty() && data.len() % CHUNK_ALIGNMENT == 0 => {
                    return Ok(Some(self.emit(data)));
                }
                Some(Ok(data)) => self.pending.extend_from_slice(&data),
            }
        }

        let len = if self.exhausted {
            self.pending.len()
        } else {
            self.pending.len() - self.pending.len() % CHUNK_ALIGNMENT
        };
        if len == 0 {
            return Ok(None);
        }
        let data = self.pending.split_to(len).freeze();
        Ok(Some(self.emit(data)))
    }

    /// Bytes handed out so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn emit(&mut self, data: Bytes) -> Chunk {
        let chunk = Chunk::new(self.offset, data);
        self.offset = chunk.end();
        chunk
    }
}
