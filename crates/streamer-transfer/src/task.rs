//! One transfer from start to terminal event.
//!
//! Uploads feed the pump's output through an in-memory pipe that doubles as
//! the streaming request body. Downloads pump the response body into a
//! `<destination>.part` file that is only renamed into place once every byte
//! (and, for GCM, the tag) has been verified.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Method, Response, Url};
use streamer_crypto::ChunkCipher;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PumpError, TransferError};
use crate::events::{
    CancelledEvent, CompleteEvent, CompletionDetails, ErrorEvent, EventSink, ProgressEvent,
    TransferEvent,
};
use crate::files::{DEFAULT_MIME_TYPE, mime_for_path};
use crate::progress::ProgressTracker;
use crate::pump::StreamPump;
use crate::registry::TransferRegistry;
use crate::types::{Direction, TransferId, TransferStatus};

/// Validated request line and headers.
#[derive(Debug, Clone)]
pub(crate) struct PreparedRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
}

pub(crate) struct TransferTask {
    pub id: TransferId,
    pub direction: Direction,
    pub request: PreparedRequest,
    pub path: PathBuf,
    pub cipher: Option<ChunkCipher>,
    pub client: Client,
    pub pump: StreamPump,
    pub registry: Arc<TransferRegistry>,
    pub sink: Arc<dyn EventSink>,
    pub token: CancellationToken,
    /// Bytes written to the sink so far, counted on every write whether or
    /// not it was reported. Kept here so terminal events do not depend on
    /// the registry entry still existing.
    pub bytes: AtomicU64,
    /// Expected output size, 0 until known.
    pub total: AtomicU64,
}

struct Completion {
    bytes: u64,
    total_bytes: u64,
    details: CompletionDetails,
}

/// A fully pumped download, still sitting in its `.part` file.
struct Received {
    bytes: u64,
    total_bytes: u64,
    content_type: Option<String>,
}

impl TransferTask {
    pub(crate) async fn run(mut self) {
        let started = Instant::now();
        let result = if self.token.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            match self.direction {
                Direction::Upload => self.upload().await,
                Direction::Download => self.download().await,
            }
        };
        self.finish(result, started);
    }

    // ── Upload ──────────────────────────────────────────────────────────

    async fn upload(&mut self) -> Result<Completion, TransferError> {
        let (file, file_size) = open_source(&self.path).await?;
        let cipher = self.cipher.take();
        let total = cipher
            .as_ref()
            .map_or(file_size, |c| c.output_len(file_size));

        let token = self.token.clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(TransferError::Cancelled),
            result = self.send(file, cipher, total) => result,
        }
    }

    async fn send(
        &self,
        mut file: fs::File,
        cipher: Option<ChunkCipher>,
        total: u64,
    ) -> Result<Completion, TransferError> {
        self.registry.activate(&self.id, total);
        self.total.store(total, Ordering::Relaxed);
        let tracker = ProgressTracker::start(total);
        info!(
            transfer_id = %self.id,
            url = %self.request.url,
            total,
            "upload started"
        );

        let chunk_size = self.pump.chunk_size();
        let (mut pipe_tx, pipe_rx) = tokio::io::duplex(chunk_size);
        let body = reqwest::Body::wrap_stream(ReaderStream::with_capacity(pipe_rx, chunk_size));

        let request = self
            .client
            .request(self.request.method.clone(), self.request.url.clone())
            .headers(self.request.headers.clone())
            .header(CONTENT_LENGTH, total)
            .body(body)
            .send();

        let pump = async {
            let mut sink = CountingWriter::new(&mut pipe_tx, &self.bytes);
            let result = self
                .pump
                .run(
                    &mut file,
                    &mut sink,
                    cipher,
                    total,
                    |bytes, _| self.report(&tracker, bytes),
                    || self.token.is_cancelled(),
                )
                .await;
            // Closing the write half ends the request body.
            let _ = sink.shutdown().await;
            result
        };

        let (pumped, response) = tokio::join!(pump, request);
        let (bytes, response) = match (pumped, response) {
            (Ok(bytes), Ok(response)) => (bytes, response),
            (Err(PumpError::Cancelled), _) => return Err(TransferError::Cancelled),
            (Err(e @ (PumpError::SourceFailed(_) | PumpError::Cipher(_))), _) => {
                return Err(e.into());
            }
            // The server may have answered early and reset the connection
            // before its reply could be read; only the transport error is
            // left to report.
            (_, Err(e)) => return Err(TransferError::Network(e)),
            (Err(e), Ok(response)) => {
                // The server stopped reading the body. Its answer says why.
                if !response.status().is_success() {
                    return Err(status_error(response).await);
                }
                return Err(e.into());
            }
        };

        let status = response.status();
        let response_headers = header_map(response.headers());
        let response_body = response.text().await?;
        if !status.is_success() {
            return Err(TransferError::HttpStatus {
                status: status.as_u16(),
                body: response_body,
            });
        }

        Ok(Completion {
            bytes,
            total_bytes: total,
            details: CompletionDetails::Upload {
                response_code: status.as_u16(),
                response_body,
                response_headers,
            },
        })
    }

    // ── Download ────────────────────────────────────────────────────────

    async fn download(&mut self) -> Result<Completion, TransferError> {
        prepare_destination(&self.path).await?;
        let part = part_path(&self.path);
        let cipher = self.cipher.take();

        let token = self.token.clone();
        let received = tokio::select! {
            biased;
            _ = token.cancelled() => Err(TransferError::Cancelled),
            result = self.receive(&part, cipher) => result,
        };

        // Once every byte is in, moving the file into place is not
        // interruptible.
        let result = match received {
            Ok(received) => self.deliver(&part, received).await,
            Err(e) => Err(e),
        };

        // Partial output is never trusted.
        if result.is_err() {
            discard_partial(&part).await;
        }
        result
    }

    async fn receive(
        &self,
        part: &Path,
        cipher: Option<ChunkCipher>,
    ) -> Result<Received, TransferError> {
        self.registry.activate(&self.id, 0);
        let started = Instant::now();
        info!(
            transfer_id = %self.id,
            url = %self.request.url,
            dest = %self.path.display(),
            "download started"
        );

        let response = self
            .client
            .request(self.request.method.clone(), self.request.url.clone())
            .headers(self.request.headers.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && v != DEFAULT_MIME_TYPE);
        let length = response.content_length().unwrap_or(0);
        let total = cipher.as_ref().map_or(length, |c| c.output_len(length));
        self.registry.set_total(&self.id, total);
        self.total.store(total, Ordering::Relaxed);
        let tracker = ProgressTracker::with_start(started, total);

        let file = fs::File::create(part)
            .await
            .map_err(|source| TransferError::DestinationUnavailable {
                path: part.to_path_buf(),
                source,
            })?;
        let mut file = CountingWriter::new(file, &self.bytes);
        let mut body = StreamReader::new(Box::pin(
            response.bytes_stream().map_err(io::Error::other),
        ));

        let bytes = self
            .pump
            .run(
                &mut body,
                &mut file,
                cipher,
                total,
                |bytes, _| self.report(&tracker, bytes),
                || self.token.is_cancelled(),
            )
            .await?;
        drop(file);

        Ok(Received {
            bytes,
            total_bytes: total,
            content_type,
        })
    }

    async fn deliver(&self, part: &Path, received: Received) -> Result<Completion, TransferError> {
        commit(part, &self.path).await?;

        let mime_type = received
            .content_type
            .unwrap_or_else(|| mime_for_path(&self.path).to_string());
        Ok(Completion {
            bytes: received.bytes,
            total_bytes: received.total_bytes,
            details: CompletionDetails::Download {
                file_path: self.path.display().to_string(),
                mime_type,
            },
        })
    }

    // ── Reporting ───────────────────────────────────────────────────────

    fn report(&self, tracker: &ProgressTracker, bytes: u64) {
        // The pump's start marker; nothing has moved yet.
        if bytes == 0 {
            debug!(transfer_id = %self.id, total = tracker.total_bytes(), "pump started");
            return;
        }

        self.registry.update_progress(&self.id, bytes);

        let snap = tracker.snapshot(bytes);
        self.sink.emit(TransferEvent::Progress(ProgressEvent {
            transfer_id: self.id.clone(),
            direction: self.direction,
            bytes_transferred: bytes,
            total_bytes: snap.total_bytes,
            percent: snap.percent,
            speed: snap.bytes_per_sec,
            estimated_time_remaining_secs: snap.eta.map(|d| d.as_secs_f64()),
            elapsed_ms: snap.elapsed.as_millis() as u64,
        }));
    }

    /// Record the terminal state, then emit exactly one terminal event.
    fn finish(&self, result: Result<Completion, TransferError>, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(done) => {
                self.registry
                    .finish(&self.id, TransferStatus::Completed, done.bytes, None);
                info!(
                    transfer_id = %self.id,
                    direction = %self.direction,
                    bytes = done.bytes,
                    duration_ms,
                    "transfer completed"
                );
                self.sink.emit(TransferEvent::Complete(CompleteEvent {
                    transfer_id: self.id.clone(),
                    direction: self.direction,
                    bytes_transferred: done.bytes,
                    total_bytes: done.total_bytes,
                    duration_ms,
                    details: done.details,
                }));
            }
            Err(e) if e.is_cancelled() => {
                let bytes = self.bytes.load(Ordering::Relaxed);
                let total_bytes = self.total.load(Ordering::Relaxed);
                self.registry
                    .finish(&self.id, TransferStatus::Cancelled, bytes, None);
                info!(
                    transfer_id = %self.id,
                    direction = %self.direction,
                    bytes,
                    "transfer cancelled"
                );
                self.sink.emit(TransferEvent::Cancelled(CancelledEvent {
                    transfer_id: self.id.clone(),
                    direction: self.direction,
                    bytes_transferred: bytes,
                    total_bytes,
                    reason: "cancelled by caller".into(),
                }));
            }
            Err(e) => {
                let bytes = self.bytes.load(Ordering::Relaxed);
                let total_bytes = self.total.load(Ordering::Relaxed);
                let code = e.code();
                let message = e.to_string();
                warn!(
                    transfer_id = %self.id,
                    direction = %self.direction,
                    code = %code,
                    bytes,
                    "transfer failed: {}",
                    message
                );
                self.registry
                    .finish(&self.id, TransferStatus::Failed, bytes, Some(message.clone()));
                self.sink.emit(TransferEvent::Error(ErrorEvent {
                    transfer_id: self.id.clone(),
                    direction: self.direction,
                    code,
                    message,
                    bytes_transferred: bytes,
                    total_bytes,
                }));
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

async fn open_source(path: &Path) -> Result<(fs::File, u64), TransferError> {
    let meta = match fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(TransferError::FileNotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(TransferError::SourceUnreadable {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if !meta.is_file() {
        return Err(TransferError::FileNotFound(path.to_path_buf()));
    }

    let file = fs::File::open(path)
        .await
        .map_err(|source| TransferError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
    Ok((file, meta.len()))
}

async fn prepare_destination(dest: &Path) -> Result<(), TransferError> {
    let unavailable = |source: io::Error| TransferError::DestinationUnavailable {
        path: dest.to_path_buf(),
        source,
    };

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(unavailable)?;
    }
    if fs::metadata(dest).await.is_ok_and(|m| m.is_dir()) {
        return Err(unavailable(io::Error::new(
            io::ErrorKind::IsADirectory,
            "destination is a directory",
        )));
    }
    Ok(())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Move a finished `.part` file over the destination. `rename` replaces an
/// existing file in one step, so the old contents survive any failure.
async fn commit(part: &Path, dest: &Path) -> Result<(), TransferError> {
    fs::rename(part, dest)
        .await
        .map_err(|source| TransferError::DestinationUnavailable {
            path: dest.to_path_buf(),
            source,
        })?;
    debug!(dest = %dest.display(), "download committed");
    Ok(())
}

async fn discard_partial(part: &Path) {
    match fs::remove_file(part).await {
        Ok(()) => debug!(part = %part.display(), "discarded partial download"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(part = %part.display(), "failed to remove partial download: {}", e),
    }
}

/// Sink wrapper that adds every accepted byte to a shared counter.
struct CountingWriter<'a, W> {
    inner: W,
    count: &'a AtomicU64,
}

impl<'a, W> CountingWriter<'a, W> {
    fn new(inner: W, count: &'a AtomicU64) -> Self {
        Self { inner, count }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<'_, W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.count.fetch_add(*n as u64, Ordering::Relaxed);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

async fn status_error(response: Response) -> TransferError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransferError::HttpStatus { status, body }
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgressPolicy;
    use crate::events::NullSink;

    fn download_task(dest: &Path, token: CancellationToken) -> TransferTask {
        TransferTask {
            id: TransferId::from("dl"),
            direction: Direction::Download,
            request: PreparedRequest {
                url: Url::parse("http://127.0.0.1:9/download").unwrap(),
                method: Method::GET,
                headers: HeaderMap::new(),
            },
            path: dest.to_path_buf(),
            cipher: None,
            client: Client::new(),
            pump: StreamPump::new(16, ProgressPolicy::EveryChunk),
            registry: Arc::new(TransferRegistry::new()),
            sink: Arc::new(NullSink),
            token,
            bytes: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/tmp/out/video.mp4")),
            PathBuf::from("/tmp/out/video.mp4.part")
        );
    }

    #[tokio::test]
    async fn missing_source_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_source(&dir.path().join("nope.bin")).await.unwrap_err();
        assert!(matches!(err, TransferError::FileNotFound(_)));

        // A directory is not an uploadable file either.
        let err = open_source(dir.path()).await.unwrap_err();
        assert!(matches!(err, TransferError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn destination_parents_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a/b/c/file.bin");
        prepare_destination(&dest).await.unwrap();
        assert!(dir.path().join("a/b/c").is_dir());

        let err = prepare_destination(dir.path()).await.unwrap_err();
        assert!(matches!(err, TransferError::DestinationUnavailable { .. }));
    }

    #[tokio::test]
    async fn commit_replaces_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        let part = part_path(&dest);
        fs::write(&dest, b"old").await.unwrap();
        fs::write(&part, b"new").await.unwrap();

        commit(&part, &dest).await.unwrap();
        assert_eq!(fs::read(&dest).await.unwrap(), b"new");
        assert!(!part.exists());

        discard_partial(&part).await;
    }

    #[tokio::test]
    async fn failed_commit_keeps_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        fs::write(&dest, b"old").await.unwrap();

        let err = commit(&part_path(&dest), &dest).await.unwrap_err();
        assert!(matches!(err, TransferError::DestinationUnavailable { .. }));
        assert_eq!(fs::read(&dest).await.unwrap(), b"old");
    }

    #[tokio::test]
    async fn delivery_ignores_late_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clip.mp4");
        let part = part_path(&dest);
        fs::write(&dest, b"old").await.unwrap();
        fs::write(&part, b"fresh").await.unwrap();

        let token = CancellationToken::new();
        let task = download_task(&dest, token.clone());
        token.cancel();

        let done = task
            .deliver(
                &part,
                Received {
                    bytes: 5,
                    total_bytes: 5,
                    content_type: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(done.bytes, 5);
        assert!(matches!(
            done.details,
            CompletionDetails::Download { ref mime_type, .. } if mime_type == "video/mp4"
        ));
        assert_eq!(fs::read(&dest).await.unwrap(), b"fresh");
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn counted_bytes_include_unreported_writes() {
        let count = AtomicU64::new(0);
        let pump = StreamPump::new(
            16,
            ProgressPolicy::Throttled {
                min_bytes: 1_000,
                min_percent: 0.0,
            },
        );
        let data = vec![1u8; 160];
        let mut source = &data[..];
        let mut sink = CountingWriter::new(Vec::new(), &count);
        let mut reports = Vec::new();
        let checks = std::cell::Cell::new(0);

        let err = pump
            .run(
                &mut source,
                &mut sink,
                None,
                160,
                |b, _| reports.push(b),
                || {
                    checks.set(checks.get() + 1);
                    checks.get() > 3
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PumpError::Cancelled));
        assert_eq!(reports, vec![0]);
        assert_eq!(count.load(Ordering::Relaxed), 48);
        assert_eq!(sink.inner.len(), 48);
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("x-tag", "a".parse().unwrap());
        headers.append("x-tag", "b".parse().unwrap());
        headers.insert("content-type", "text/plain".parse().unwrap());

        let map = header_map(&headers);
        assert_eq!(map["x-tag"], "a, b");
        assert_eq!(map["content-type"], "text/plain");
    }
}
