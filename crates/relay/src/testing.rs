//! In-memory backend, sink and stream helpers for tests.

use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use driverelay_drive::{ChunkStatus, Error, FileMetadata, ResumableSession, UploadedFile};
use driverelay_transfer::Chunk;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::backend::StorageBackend;
use crate::sink::{SinkError, StatusSink, StatusUpdate};
use crate::source::ByteStream;

pub fn stream_of(items: Vec<Vec<u8>>) -> ByteStream {
    stream::iter(items.into_iter().map(|v| Ok(Bytes::from(v)))).boxed()
}

/// Yields `items`, then fails with `message`.
pub fn failing_stream(items: Vec<Vec<u8>>, message: &str) -> ByteStream {
    let err = io::Error::new(io::ErrorKind::ConnectionReset, message.to_string());
    stream::iter(items.into_iter().map(|v| Ok(Bytes::from(v))))
        .chain(stream::once(async move { Err(err) }))
        .boxed()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open {
        name: String,
        parents: Vec<String>,
    },
    Put {
        session: String,
        offset: u64,
        len: u64,
        total: u64,
        range: String,
        at: Instant,
    },
    Abort {
        session: String,
    },
}

type PutHook = Box<dyn Fn(usize) + Send + Sync>;

/// Scriptable [`StorageBackend`]. Session URLs are `mock://<file name>`.
#[derive(Default)]
pub struct MockBackend {
    calls: Mutex<Vec<Call>>,
    puts: AtomicUsize,
    fail_open: Option<u16>,
    fail_put_at: Option<usize>,
    put_delay: Option<Duration>,
    on_put: Option<PutHook>,
    fail_abort: bool,
    short_persist: bool,
    complete_early: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(mut self, status: u16) -> Self {
        self.fail_open = Some(status);
        self
    }

    /// Fails the PUT with the given zero-based index.
    pub fn fail_put_at(mut self, index: usize) -> Self {
        self.fail_put_at = Some(index);
        self
    }

    pub fn put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    /// Runs `hook` with the PUT index when each PUT starts.
    pub fn on_put(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_put = Some(Box::new(hook));
        self
    }

    pub fn fail_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    /// Acknowledges one byte less than each chunk ends at.
    pub fn short_persist(mut self) -> Self {
        self.short_persist = true;
        self
    }

    /// Answers every PUT as if the upload were complete.
    pub fn complete_early(mut self) -> Self {
        self.complete_early = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// `(offset, len, total)` of every PUT.
    pub fn puts(&self) -> Vec<(u64, u64, u64)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Put {
                    offset, len, total, ..
                } => Some((offset, len, total)),
                _ => None,
            })
            .collect()
    }

    pub fn ranges(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Put { range, .. } => Some(range),
                _ => None,
            })
            .collect()
    }

    pub fn abort_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Abort { .. }))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl StorageBackend for MockBackend {
    fn open_session<'a>(
        &'a self,
        metadata: &'a FileMetadata,
    ) -> BoxFuture<'a, Result<ResumableSession, Error>> {
        Box::pin(async move {
            self.record(Call::Open {
                name: metadata.name.clone(),
                parents: metadata.parents.clone(),
            });
            if let Some(status) = self.fail_open {
                return Err(Error::Api {
                    status,
                    body: "forbidden".into(),
                });
            }
            Ok(ResumableSession {
                url: format!("mock://{}", metadata.name),
            })
        })
    }

    fn send_chunk<'a>(
        &'a self,
        session: &'a ResumableSession,
        chunk: &'a Chunk,
        total: u64,
    ) -> BoxFuture<'a, Result<ChunkStatus, Error>> {
        Box::pin(async move {
            let index = self.puts.fetch_add(1, Ordering::SeqCst);
            self.record(Call::Put {
                session: session.url.clone(),
                offset: chunk.offset,
                len: chunk.len(),
                total,
                range: chunk.content_range(total),
                at: Instant::now(),
            });
            if let Some(hook) = &self.on_put {
                hook(index);
            }
            if let Some(delay) = self.put_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_put_at == Some(index) {
                return Err(Error::Api {
                    status: 500,
                    body: "backend error".into(),
                });
            }
            if self.complete_early || chunk.end() == total {
                let name = session.url.trim_start_matches("mock://").to_string();
                return Ok(ChunkStatus::Complete(Some(UploadedFile {
                    id: format!("id-{name}"),
                    name,
                    mime_type: "application/octet-stream".into(),
                })));
            }
            let persisted = if self.short_persist {
                chunk.end() - 1
            } else {
                chunk.end()
            };
            Ok(ChunkStatus::Incomplete {
                persisted: Some(persisted),
            })
        })
    }

    fn abort_session<'a>(&'a self, session: &'a ResumableSession) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            self.record(Call::Abort {
                session: session.url.clone(),
            });
            if self.fail_abort {
                return Err(Error::Api {
                    status: 500,
                    body: "abort failed".into(),
                });
            }
            Ok(())
        })
    }
}

/// [`StatusSink`] that records every delivered update with its arrival time.
#[derive(Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<(Instant, StatusUpdate)>>,
    attempts: AtomicUsize,
    fail: bool,
    delay: Option<Duration>,
    call_delays: Vec<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every delivery fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Holds every delivery for `delay` after recording it.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Holds the n-th delivery for `delays[n]`; later calls fall back to the
    /// plain delay.
    pub fn with_call_delays(mut self, delays: Vec<Duration>) -> Self {
        self.call_delays = delays;
        self
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().iter().map(|(_, u)| u.clone()).collect()
    }

    pub fn timed_updates(&self) -> Vec<(Instant, StatusUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl StatusSink for RecordingSink {
    fn update<'a>(&'a self, update: &'a StatusUpdate) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            let call = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SinkError("chat unavailable".into()));
            }
            self.updates
                .lock()
                .unwrap()
                .push((Instant::now(), update.clone()));
            let delay = self.call_delays.get(call).copied().or(self.delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        })
    }
}
