//! Drive upload client.
//!
//! Async HTTP client using `reqwest`. Redirects are disabled because the
//! upload protocol answers intermediate chunks with `308 Resume Incomplete`,
//! which must reach the caller instead of being followed.

use std::time::Duration;

use driverelay_transfer::Chunk;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, HeaderValue, LOCATION, RANGE};
use tracing::{debug, warn};

use crate::types::{ChunkStatus, FileMetadata, ResumableSession, UploadedFile, parse_persisted_range};

/// Drive v3 media upload endpoint.
pub const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the Drive client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("session response carried no Location header")]
    MissingLocation,

    #[error("invalid access token")]
    InvalidToken,

    #[error("token error: {0}")]
    Token(String),
}

/// Drive resumable upload client.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    upload_url: String,
}

impl Client {
    /// Creates a client for the public Drive upload endpoint.
    pub fn new() -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
        })
    }

    /// Points the client at a different upload endpoint.
    pub fn with_upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = url.into();
        self
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    /// Opens a resumable upload session for `metadata`.
    ///
    /// Only `200`/`201` with a `Location` header count as success.
    pub async fn initiate(
        &self,
        token: &str,
        metadata: &FileMetadata,
    ) -> Result<ResumableSession, Error> {
        let auth =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| Error::InvalidToken)?;

        let resp = self
            .http
            .post(&self.upload_url)
            .query(&[("uploadType", "resumable")])
            .header(AUTHORIZATION, auth)
            .json(metadata)
            .send()
            .await?;
        let status = resp.status();

        if !matches!(status, StatusCode::OK | StatusCode::CREATED) {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let url = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(Error::MissingLocation)?
            .to_string();

        debug!(name = %metadata.name, "resumable session opened");
        Ok(ResumableSession { url })
    }

    /// Sends one chunk to the session.
    ///
    /// `total` is the declared size of the whole upload and goes into the
    /// `Content-Range` header of every chunk.
    pub async fn put_chunk(
        &self,
        session: &ResumableSession,
        chunk: &Chunk,
        total: u64,
    ) -> Result<ChunkStatus, Error> {
        let content_range = chunk.content_range(total);
        let resp = self
            .http
            .put(&session.url)
            .header(CONTENT_RANGE, &content_range)
            .header(CONTENT_LENGTH, chunk.len())
            .body(chunk.data.clone())
            .send()
            .await?;
        let status = resp.status();

        match status {
            StatusCode::PERMANENT_REDIRECT => {
                let persisted = resp
                    .headers()
                    .get(RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_persisted_range);
                debug!(range = %content_range, ?persisted, "chunk accepted");
                Ok(ChunkStatus::Incomplete { persisted })
            }
            StatusCode::OK | StatusCode::CREATED => {
                let body = resp.bytes().await?;
                let file = match serde_json::from_slice::<UploadedFile>(&body) {
                    Ok(file) => Some(file),
                    Err(e) => {
                        debug!(error = %e, "completion body is not a file resource");
                        None
                    }
                };
                debug!(range = %content_range, "final chunk accepted");
                Ok(ChunkStatus::Complete(file))
            }
            _ => {
                let body = resp.text().await.unwrap_or_default();
                Err(Error::Api {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    /// Abandons the session. Returns the status code the backend answered
    /// with; Drive uses `499` for a cancelled session.
    pub async fn abort(&self, session: &ResumableSession) -> Result<u16, Error> {
        let resp = self.http.delete(&session.url).send().await?;
        let status = resp.status().as_u16();
        if !matches!(status, 200..=299 | 499) {
            warn!(status, "unexpected status aborting upload session");
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// One request as seen by the mock server.
    #[derive(Debug, Clone)]
    struct Captured {
        head: String,
        body: Vec<u8>,
    }

    impl Captured {
        fn request_line(&self) -> &str {
            self.head.lines().next().unwrap_or_default()
        }

        fn header(&self, name: &str) -> Option<String> {
            self.head.lines().skip(1).find_map(|line| {
                let (k, v) = line.split_once(':')?;
                k.trim()
                    .eq_ignore_ascii_case(name)
                    .then(|| v.trim().to_string())
            })
        }
    }

    type Requests = Arc<Mutex<Vec<Captured>>>;

    fn find_header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
    }

    async fn read_request(stream: &mut TcpStream) -> Captured {
        let mut buf = Vec::new();
        let mut tmp = vec![0u8; 8192];

        let header_end = loop {
            let n = stream.read(&mut tmp).await.unwrap();
            if n == 0 {
                break buf.len();
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(end) = find_header_end(&buf) {
                break end;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
        let headers_only = Captured {
            head: head.clone(),
            body: Vec::new(),
        };
        let content_length = headers_only
            .header("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let n = stream.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
        }

        let body_end = buf.len().min(header_end + content_length);
        Captured {
            head,
            body: buf[header_end..body_end].to_vec(),
        }
    }

    fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut resp = format!("HTTP/1.1 {status}\r\n");
        for (k, v) in headers {
            resp.push_str(&format!("{k}: {v}\r\n"));
        }
        resp.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        ));
        resp
    }

    /// Starts a mock HTTP server that answers one connection per response,
    /// in order, and records every request it receives.
    async fn mock_server<F>(responses: F) -> (String, Requests, tokio::task::JoinHandle<()>)
    where
        F: FnOnce(&str) -> Vec<String>,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let responses = responses(&url);
        let requests: Requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            for resp in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let captured = read_request(&mut stream).await;
                recorded.lock().unwrap().push(captured);
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, requests, handle)
    }

    fn client_for(url: &str) -> Client {
        Client::new().unwrap().with_upload_url(format!("{url}/upload"))
    }

    #[tokio::test]
    async fn initiate_returns_session_location() {
        let (url, requests, handle) = mock_server(|base| {
            let location = format!("{base}/session/abc");
            vec![http_response("200 OK", &[("Location", location.as_str())], "")]
        })
        .await;

        let client = client_for(&url);
        let meta = FileMetadata::in_folder("movie.mkv", "folder-1");
        let session = client.initiate("tok", &meta).await.unwrap();
        assert_eq!(session.url, format!("{url}/session/abc"));

        let reqs = requests.lock().unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(
            reqs[0].request_line(),
            "POST /upload?uploadType=resumable HTTP/1.1"
        );
        assert_eq!(reqs[0].header("authorization").as_deref(), Some("Bearer tok"));
        assert_eq!(
            reqs[0].header("content-type").as_deref(),
            Some("application/json")
        );
        let body: serde_json::Value = serde_json::from_slice(&reqs[0].body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"name": "movie.mkv", "parents": ["folder-1"]})
        );

        handle.abort();
    }

    #[tokio::test]
    async fn initiate_forbidden_is_api_error() {
        let (url, _requests, handle) = mock_server(|_| {
            vec![http_response(
                "403 Forbidden",
                &[("Content-Type", "application/json")],
                r#"{"error":{"code":403,"message":"insufficient permissions"}}"#,
            )]
        })
        .await;

        let client = client_for(&url);
        let err = client
            .initiate("tok", &FileMetadata::in_folder("a", "b"))
            .await
            .unwrap_err();
        match err {
            Error::Api { status, body } => {
                assert_eq!(status, 403);
                assert!(body.contains("insufficient permissions"));
            }
            other => panic!("expected API error, got {other:?}"),
        }

        handle.abort();
    }

    #[tokio::test]
    async fn initiate_without_location_fails() {
        let (url, _requests, handle) =
            mock_server(|_| vec![http_response("200 OK", &[], "")]).await;

        let client = client_for(&url);
        let err = client
            .initiate("tok", &FileMetadata::in_folder("a", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingLocation));

        handle.abort();
    }

    #[tokio::test]
    async fn initiate_rejects_invalid_token() {
        let client = Client::new().unwrap().with_upload_url("http://127.0.0.1:9/upload");
        let err = client
            .initiate("bad\ntoken", &FileMetadata::in_folder("a", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
    }

    #[tokio::test]
    async fn put_chunk_frames_range_and_reads_resume_incomplete() {
        let (url, requests, handle) = mock_server(|_| {
            vec![http_response(
                "308 Resume Incomplete",
                &[("Range", "bytes=0-4")],
                "",
            )]
        })
        .await;

        let client = client_for(&url);
        let session = ResumableSession {
            url: format!("{url}/session/abc"),
        };
        let chunk = Chunk::new(0, Bytes::from_static(b"hello"));
        let status = client.put_chunk(&session, &chunk, 11).await.unwrap();
        assert_eq!(status, ChunkStatus::Incomplete { persisted: Some(5) });

        let reqs = requests.lock().unwrap();
        assert_eq!(reqs[0].request_line(), "PUT /session/abc HTTP/1.1");
        assert_eq!(
            reqs[0].header("content-range").as_deref(),
            Some("bytes 0-4/11")
        );
        assert_eq!(reqs[0].header("content-length").as_deref(), Some("5"));
        assert_eq!(reqs[0].body, b"hello");

        handle.abort();
    }

    #[tokio::test]
    async fn put_final_chunk_returns_file() {
        let (url, requests, handle) = mock_server(|_| {
            vec![http_response(
                "200 OK",
                &[("Content-Type", "application/json")],
                r#"{"kind":"drive#file","id":"file-9","name":"movie.mkv","mimeType":"video/x-matroska"}"#,
            )]
        })
        .await;

        let client = client_for(&url);
        let session = ResumableSession {
            url: format!("{url}/session/abc"),
        };
        let chunk = Chunk::new(5, Bytes::from_static(b" world"));
        let status = client.put_chunk(&session, &chunk, 11).await.unwrap();
        match status {
            ChunkStatus::Complete(Some(file)) => {
                assert_eq!(file.id, "file-9");
                assert_eq!(file.name, "movie.mkv");
            }
            other => panic!("expected completion, got {other:?}"),
        }

        let reqs = requests.lock().unwrap();
        assert_eq!(
            reqs[0].header("content-range").as_deref(),
            Some("bytes 5-10/11")
        );

        handle.abort();
    }

    #[tokio::test]
    async fn unreadable_completion_body_still_completes() {
        let (url, _requests, handle) =
            mock_server(|_| vec![http_response("201 Created", &[], "<html>ok</html>")]).await;

        let client = client_for(&url);
        let session = ResumableSession {
            url: format!("{url}/session/abc"),
        };
        let chunk = Chunk::new(0, Bytes::from_static(b"x"));
        let status = client.put_chunk(&session, &chunk, 1).await.unwrap();
        assert!(matches!(status, ChunkStatus::Complete(None)));

        handle.abort();
    }

    #[tokio::test]
    async fn put_chunk_error_carries_body() {
        let (url, _requests, handle) = mock_server(|_| {
            vec![http_response(
                "400 Bad Request",
                &[],
                "Failed to parse Content-Range header.",
            )]
        })
        .await;

        let client = client_for(&url);
        let session = ResumableSession {
            url: format!("{url}/session/abc"),
        };
        let chunk = Chunk::new(0, Bytes::from_static(b"x"));
        let err = client.put_chunk(&session, &chunk, 1).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("400"), "error should mention 400: {msg}");
        assert!(msg.contains("Content-Range"));

        handle.abort();
    }

    #[tokio::test]
    async fn empty_upload_sends_star_range() {
        let (url, requests, handle) =
            mock_server(|_| vec![http_response("200 OK", &[], "{}")]).await;

        let client = client_for(&url);
        let session = ResumableSession {
            url: format!("{url}/session/abc"),
        };
        let chunk = Chunk::new(0, Bytes::new());
        let status = client.put_chunk(&session, &chunk, 0).await.unwrap();
        assert!(matches!(status, ChunkStatus::Complete(_)));

        let reqs = requests.lock().unwrap();
        assert_eq!(
            reqs[0].header("content-range").as_deref(),
            Some("bytes */0")
        );
        assert!(reqs[0].body.is_empty());

        handle.abort();
    }

    #[tokio::test]
    async fn abort_sends_delete() {
        let (url, requests, handle) =
            mock_server(|_| vec![http_response("499 Client Closed Request", &[], "")]).await;

        let client = client_for(&url);
        let session = ResumableSession {
            url: format!("{url}/session/abc"),
        };
        let status = client.abort(&session).await.unwrap();
        assert_eq!(status, 499);

        let reqs = requests.lock().unwrap();
        assert_eq!(reqs[0].request_line(), "DELETE /session/abc HTTP/1.1");

        handle.abort();
    }

    #[test]
    fn client_defaults_to_drive_endpoint() {
        let client = Client::new().unwrap();
        assert_eq!(client.upload_url(), DEFAULT_UPLOAD_URL);
    }
}
