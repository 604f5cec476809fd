//! Stream Download Engine (C5): pulls a chunked download to disk (or to
//! an in-memory blob) with progress reporting, post-write size
//! verification, and resume-safe cleanup delegated to C9.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use transfer_types::{generate_request_id, StreamDownloadSession};

use crate::cleanup::{self, CleanupReason};
use crate::error::TransferError;

/// Server's response to `start`.
#[derive(Debug, Clone)]
pub struct DownloadStartAck {
    pub session_id: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
}

/// One fetched chunk's bytes.
#[derive(Debug, Clone)]
pub struct DownloadChunk {
    pub data: Vec<u8>,
}

/// What C5 needs from whichever adapter sits underneath it.
#[async_trait]
pub trait DownloadTransport: Send + Sync {
    async fn start_download(&self, path: &str) -> Result<DownloadStartAck, TransferError>;

    async fn fetch_chunk(
        &self,
        session_id: &str,
        chunk_index: u64,
    ) -> Result<DownloadChunk, TransferError>;

    async fn finish_download(&self, session_id: &str) -> Result<(), TransferError>;

    /// Best-effort: never blocks the caller's error/cancel path.
    async fn abort_download(&self, session_id: &str);
}

/// Max stat attempts and backoff multiplier used to absorb filesystem
/// flush lag after a download finishes writing (spec §4.5).
const STAT_MAX_ATTEMPTS: u32 = 8;
const STAT_BACKOFF_STEP: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub success: bool,
    pub message: String,
    /// Present only when the caller didn't provide a `target_path` (i.e.
    /// a blob download).
    pub blob: Option<Vec<u8>>,
}

impl DownloadOutcome {
    fn ok(message: impl Into<String>, blob: Option<Vec<u8>>) -> Self {
        Self { success: true, message: message.into(), blob }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), blob: None }
    }

    fn cancelled() -> Self {
        Self::failed(TransferError::Cancelled.message())
    }
}

/// Run one download session to completion, cancellation, or failure.
/// `target_path: None` buffers the whole download and returns it as a
/// blob; `Some(path)` streams directly to disk. `on_progress`, when
/// given, is called `(bytes_written, file_size)` after every chunk.
pub async fn run_download(
    transport: &dyn DownloadTransport,
    remote_path: &str,
    target_path: Option<PathBuf>,
    cancel: CancellationToken,
    on_progress: Option<&(dyn Fn(u64, u64) + Send + Sync)>,
) -> DownloadOutcome {
    if cancel.is_cancelled() {
        return DownloadOutcome::cancelled();
    }

    let ack = match transport.start_download(remote_path).await {
        Ok(ack) => ack,
        Err(err) => return DownloadOutcome::failed(err.message()),
    };

    let mut file = match &target_path {
        Some(path) => match tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)
            .await
        {
            Ok(file) => Some(file),
            Err(err) => return DownloadOutcome::failed(TransferError::Filesystem(err).message()),
        },
        None => None,
    };

    let mut blob = if target_path.is_none() {
        Some(Vec::with_capacity(ack.file_size as usize))
    } else {
        None
    };

    let mut session = target_path.as_ref().map(|path| StreamDownloadSession {
        session_id: Some(ack.session_id.clone()),
        file_path: remote_path.to_string(),
        target_path: path.clone(),
        request_id: generate_request_id("download"),
        start_time: std::time::Instant::now(),
        aborted: false,
        expected_size: Some(ack.file_size),
        bytes_written: 0,
    });

    let mut bytes_written: u64 = 0;
    let total_chunks = ack.total_chunks.max(1);

    for chunk_index in 0..total_chunks {
        if cancel.is_cancelled() {
            transport.abort_download(&ack.session_id).await;
            if let Some(s) = session.as_mut() {
                s.aborted = true;
                cleanup_and_log(&s.target_path, s.expected_size, s.bytes_written, CleanupReason::Cancelled)
                    .await;
            }
            return DownloadOutcome::cancelled();
        }

        let chunk = match transport.fetch_chunk(&ack.session_id, chunk_index).await {
            Ok(chunk) => chunk,
            Err(err) => {
                transport.abort_download(&ack.session_id).await;
                if let Some(s) = session.as_mut() {
                    s.aborted = true;
                    cleanup_and_log(&s.target_path, s.expected_size, s.bytes_written, CleanupReason::Error)
                        .await;
                }
                return DownloadOutcome::failed(err.message());
            }
        };

        bytes_written += chunk.data.len() as u64;
        if let Some(s) = session.as_mut() {
            s.bytes_written = bytes_written;
        }

        if let Some(file) = file.as_mut() {
            if let Err(err) = file.write_all(&chunk.data).await {
                transport.abort_download(&ack.session_id).await;
                if let Some(s) = session.as_mut() {
                    s.aborted = true;
                    cleanup_and_log(&s.target_path, s.expected_size, s.bytes_written, CleanupReason::Error)
                        .await;
                }
                return DownloadOutcome::failed(TransferError::Filesystem(err).message());
            }
        } else if let Some(blob) = blob.as_mut() {
            blob.extend_from_slice(&chunk.data);
        }

        debug!(session = %ack.session_id, bytes_written, "chunk written");
        if let Some(callback) = on_progress {
            callback(bytes_written, ack.file_size);
        }
    }

    if let Some(file) = file.as_mut() {
        if let Err(err) = file.flush().await {
            return DownloadOutcome::failed(TransferError::Filesystem(err).message());
        }
    }

    if let Err(err) = transport.finish_download(&ack.session_id).await {
        warn!("finish_download failed after all chunks written: {err}");
    }

    if let Some(path) = &target_path {
        verify_on_disk_size(path, ack.file_size).await;
    }

    DownloadOutcome::ok("download complete", blob.take())
}

/// Stat the target up to [`STAT_MAX_ATTEMPTS`] times, backing off
/// `STAT_BACKOFF_STEP * attempt` between tries. A size mismatch is logged,
/// never treated as failure (the server's reported size may be
/// approximate).
async fn verify_on_disk_size(path: &PathBuf, expected_size: u64) {
    let mut last_seen: Option<u64> = None;
    for attempt in 1..=STAT_MAX_ATTEMPTS {
        match tokio::fs::metadata(path).await {
            Ok(meta) => {
                last_seen = Some(meta.len());
                if meta.len() == expected_size {
                    return;
                }
            }
            Err(_) => {}
        }
        tokio::time::sleep(STAT_BACKOFF_STEP * attempt).await;
    }

    if last_seen != Some(expected_size) {
        warn!(
            path = %path.display(),
            expected_size,
            actual_size = ?last_seen,
            "on-disk size disagrees with server-reported size after download"
        );
    }
}

async fn cleanup_and_log(
    path: &PathBuf,
    expected_size: Option<u64>,
    bytes_written: u64,
    reason: CleanupReason,
) {
    match cleanup::cleanup_after_interruption(path, expected_size, bytes_written, reason).await {
        Ok(outcome) => debug!(?outcome, path = %path.display(), "cleanup decision after interrupted download"),
        Err(err) => warn!(path = %path.display(), "cleanup after interrupted download failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockTransport {
        chunks: Vec<Vec<u8>>,
        fail_on_chunk: Option<u64>,
        aborted: Mutex<bool>,
    }

    #[async_trait]
    impl DownloadTransport for MockTransport {
        async fn start_download(&self, _path: &str) -> Result<DownloadStartAck, TransferError> {
            let file_size: u64 = self.chunks.iter().map(|c| c.len() as u64).sum();
            Ok(DownloadStartAck {
                session_id: "sess-dl".to_string(),
                file_size,
                chunk_size: self.chunks.first().map(|c| c.len() as u64).unwrap_or(0),
                total_chunks: self.chunks.len() as u64,
            })
        }

        async fn fetch_chunk(
            &self,
            _session_id: &str,
            chunk_index: u64,
        ) -> Result<DownloadChunk, TransferError> {
            if self.fail_on_chunk == Some(chunk_index) {
                return Err(TransferError::Operation("disconnected".to_string()));
            }
            Ok(DownloadChunk { data: self.chunks[chunk_index as usize].clone() })
        }

        async fn finish_download(&self, _session_id: &str) -> Result<(), TransferError> {
            Ok(())
        }

        async fn abort_download(&self, _session_id: &str) {
            *self.aborted.lock().unwrap() = true;
        }
    }

    #[tokio::test]
    async fn blob_download_concatenates_chunks() {
        let transport = MockTransport {
            chunks: vec![b"abc".to_vec(), b"def".to_vec()],
            fail_on_chunk: None,
            aborted: Mutex::new(false),
        };
        let outcome =
            run_download(&transport, "/remote/f.bin", None, CancellationToken::new(), None).await;
        assert!(outcome.success);
        assert_eq!(outcome.blob.unwrap(), b"abcdef".to_vec());
    }

    #[tokio::test]
    async fn to_path_download_writes_file_and_verifies_size() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let transport = MockTransport {
            chunks: vec![b"abc".to_vec(), b"def".to_vec()],
            fail_on_chunk: None,
            aborted: Mutex::new(false),
        };
        let outcome = run_download(
            &transport,
            "/remote/f.bin",
            Some(target.clone()),
            CancellationToken::new(),
            None,
        )
        .await;
        assert!(outcome.success);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"abcdef".to_vec());
    }

    #[tokio::test]
    async fn interrupted_download_to_path_cleans_up_large_partial() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("partial.bin");
        let transport = MockTransport {
            chunks: vec![vec![0u8; 300_000], vec![0u8; 700_000]],
            fail_on_chunk: Some(1),
            aborted: Mutex::new(false),
        };
        let outcome = run_download(
            &transport,
            "/remote/big.bin",
            Some(target.clone()),
            CancellationToken::new(),
            None,
        )
        .await;
        assert!(!outcome.success);
        assert!(*transport.aborted.lock().unwrap());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn cancellation_mid_download_aborts_and_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let transport = MockTransport {
            chunks: vec![b"abc".to_vec(), b"def".to_vec(), b"ghi".to_vec()],
            fail_on_chunk: None,
            aborted: Mutex::new(false),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run_download(&transport, "/remote/f.bin", Some(target), cancel, None).await;
        assert_eq!(outcome, DownloadOutcome::cancelled());
    }
}
