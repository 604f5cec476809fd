//! Stream Upload Engine (C4): drives the start/chunk/finish/abort
//! handshake over whichever transport C10 hands it, enforcing serial
//! chunk ordering, adaptive timeouts, and cooperative cancellation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use transfer_types::StreamUploadSession;

use crate::chunk::ChunkSource;
use crate::error::TransferError;

/// `IDLE -> STARTING -> RUNNING -> (FINISHING|ABORTING) -> TERMINAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Starting,
    Running,
    Finishing,
    Aborting,
    Terminal,
}

/// Server's response to `start`.
#[derive(Debug, Clone)]
pub struct StartAck {
    pub session_id: String,
    pub accepted_chunk_size: u64,
    pub total_chunks: u64,
}

/// Server's response to one `chunk` send.
#[derive(Debug, Clone)]
pub struct ChunkAck {
    pub chunk_index: u64,
}

/// Final result handed back to the caller. Mirrors `BackendResponse`'s
/// success/message shape rather than a bare `Result` because a
/// cancellation is a normal outcome, not an exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub success: bool,
    pub message: String,
}

impl UploadOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }

    fn cancelled() -> Self {
        Self::failed(TransferError::Cancelled.message())
    }
}

/// What C4 needs from whichever adapter/bridge sits underneath it. Kept
/// narrow so the engine never depends on HTTP/FTP/TCP specifics directly.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn start_upload(
        &self,
        filename: &str,
        file_size: u64,
        target_path: &str,
        requested_chunk_size: Option<u64>,
        extra_payload: Option<Value>,
    ) -> Result<StartAck, TransferError>;

    async fn send_chunk(
        &self,
        session_id: &str,
        chunk_index: u64,
        chunk_total: u64,
        data: Vec<u8>,
    ) -> Result<ChunkAck, TransferError>;

    async fn finish_upload(&self, session_id: &str) -> Result<(), TransferError>;

    /// Best-effort: failures here are logged, never surfaced, and never
    /// block the caller's error/cancel path.
    async fn abort_upload(&self, session_id: &str);
}

/// `adaptive = clamp(size_mib * 20s, 120s, 900s)`.
pub fn adaptive_timeout(file_size: u64) -> Duration {
    let size_mib = file_size as f64 / (1024.0 * 1024.0);
    let seconds = (size_mib * 20.0).clamp(120.0, 900.0);
    Duration::from_secs_f64(seconds)
}

/// `max(120s, min(300s, adaptive * 0.25))`.
pub fn handshake_timeout(adaptive: Duration) -> Duration {
    let candidate = adaptive.mul_f64(0.25).min(Duration::from_secs(300));
    candidate.max(Duration::from_secs(120))
}

/// `clamp(adaptive / estimated_chunks, 60s, adaptive)`.
pub fn per_chunk_timeout(adaptive: Duration, estimated_chunks: u64) -> Duration {
    let divisor = estimated_chunks.max(1);
    let candidate = adaptive / divisor as u32;
    candidate.clamp(Duration::from_secs(60), adaptive)
}

/// `finish` uses the adaptive timeout itself.
pub fn finish_timeout(adaptive: Duration) -> Duration {
    adaptive
}

fn trace_state(state: UploadState) {
    tracing::trace!(?state, "upload state transition");
}

/// Run one upload session to completion, cancellation, or failure.
/// `on_progress`, when given, is called `(bytes_sent, file_size)` after
/// every acknowledged chunk.
pub async fn run_upload(
    transport: &dyn UploadTransport,
    source: ChunkSource,
    filename: &str,
    file_size: u64,
    target_path: &str,
    requested_chunk_size: Option<u64>,
    extra_payload: Option<Value>,
    cancel: CancellationToken,
    on_progress: Option<&(dyn Fn(u64, u64) + Send + Sync)>,
) -> UploadOutcome {
    let mut state = UploadState::Starting;
    trace_state(state);
    let adaptive = adaptive_timeout(file_size);

    if cancel.is_cancelled() {
        return UploadOutcome::cancelled();
    }

    let ack = match transport
        .start_upload(filename, file_size, target_path, requested_chunk_size, extra_payload)
        .await
    {
        Ok(ack) => ack,
        Err(err) => return UploadOutcome::failed(err.message()),
    };

    let mut session = StreamUploadSession {
        session_id: ack.session_id.clone(),
        filename: filename.to_string(),
        target_path: target_path.to_string(),
        file_size,
        accepted_chunk_size: ack.accepted_chunk_size,
        total_chunks: ack.total_chunks,
        next_chunk_index: 0,
        bytes_sent: 0,
    };
    state = UploadState::Running;
    trace_state(state);

    let estimated_chunks = session.total_chunks.max(1);
    let chunk_timeout = per_chunk_timeout(adaptive, estimated_chunks);

    while !session.is_complete() {
        if cancel.is_cancelled() {
            state = UploadState::Aborting;
            trace_state(state);
            transport.abort_upload(&session.session_id).await;
            return UploadOutcome::cancelled();
        }

        let data = match source
            .read_chunk(session.next_chunk_index, session.accepted_chunk_size, file_size)
            .await
        {
            Ok(data) => data,
            Err(err) => {
                state = UploadState::Aborting;
                trace_state(state);
                transport.abort_upload(&session.session_id).await;
                return UploadOutcome::failed(TransferError::Filesystem(err).message());
            }
        };
        let sent_len = data.len() as u64;

        if cancel.is_cancelled() {
            state = UploadState::Aborting;
            trace_state(state);
            transport.abort_upload(&session.session_id).await;
            return UploadOutcome::cancelled();
        }

        let send_result = tokio::time::timeout(
            chunk_timeout,
            transport.send_chunk(
                &session.session_id,
                session.next_chunk_index,
                session.total_chunks,
                data,
            ),
        )
        .await;

        let ack = match send_result {
            Ok(Ok(ack)) => ack,
            Ok(Err(err)) => {
                state = UploadState::Aborting;
                trace_state(state);
                transport.abort_upload(&session.session_id).await;
                return UploadOutcome::failed(err.message());
            }
            Err(_) => {
                state = UploadState::Aborting;
                trace_state(state);
                transport.abort_upload(&session.session_id).await;
                return UploadOutcome::failed(TransferError::Timeout.message());
            }
        };

        if ack.chunk_index != session.next_chunk_index {
            warn!(
                expected = session.next_chunk_index,
                got = ack.chunk_index,
                "chunk ack index mismatch, aborting session"
            );
            state = UploadState::Aborting;
            trace_state(state);
            transport.abort_upload(&session.session_id).await;
            return UploadOutcome::failed("chunk acknowledgement out of order");
        }

        session.next_chunk_index += 1;
        session.bytes_sent += sent_len;
        debug!(session = %session.session_id, sent = session.bytes_sent, "chunk acked");
        if let Some(callback) = on_progress {
            callback(session.bytes_sent, file_size);
        }
    }

    state = UploadState::Finishing;
    trace_state(state);
    let finish_result = tokio::time::timeout(
        finish_timeout(adaptive),
        transport.finish_upload(&session.session_id),
    )
    .await;

    state = UploadState::Terminal;
    trace_state(state);
    match finish_result {
        Ok(Ok(())) => UploadOutcome::ok("upload complete"),
        Ok(Err(err)) => UploadOutcome::failed(err.message()),
        Err(_) => UploadOutcome::failed(TransferError::Timeout.message()),
    }
}
