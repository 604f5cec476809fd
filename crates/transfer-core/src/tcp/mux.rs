//! TCP session multiplexer (C2): correlates outbound frames with inbound
//! replies by sequence number over one TCP connection, using a `HashMap`
//! behind a `tokio::sync::Mutex` keyed by sequence number.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

use transfer_types::{Command, TcpFrame};

use crate::frame::{self, DecodeOutcome};

/// One in-flight request: resolved by the read loop when a terminal
/// (`Success`/`Error`) frame with this sequence number arrives.
struct Pending {
    reply: oneshot::Sender<TcpFrame>,
    /// Non-terminal frames (e.g. `Progress`) are forwarded here instead of
    /// completing the request.
    progress: Option<mpsc::UnboundedSender<TcpFrame>>,
}

/// Default time to wait for any activity on a pending request before it is
/// failed with a timeout (spec §4.2/§7).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

struct MuxState {
    pending: Mutex<HashMap<u16, Pending>>,
    next_sequence: Mutex<u16>,
    writer: Mutex<OwnedWriteHalf>,
}

/// Owns one TCP connection's socket halves and the pending-request table.
/// Cloning shares the same underlying state (it's an `Arc` handle).
#[derive(Clone)]
pub struct TcpMultiplexer {
    state: Arc<MuxState>,
}

/// Error surfaced by the multiplexer when a request cannot be completed.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("connection lost")]
    ConnectionLost,
    #[error("request timed out")]
    Timeout,
    #[error("frame error: {0}")]
    Frame(#[from] crate::frame::FrameError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TcpMultiplexer {
    /// Take ownership of a connected socket and spawn its read loop.
    pub fn spawn(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let state = Arc::new(MuxState {
            pending: Mutex::new(HashMap::new()),
            next_sequence: Mutex::new(0),
            writer: Mutex::new(write_half),
        });
        let mux = Self { state };
        let reader_mux = mux.clone();
        tokio::spawn(async move {
            reader_mux.read_loop(read_half).await;
        });
        mux
    }

    /// Allocate the next sequence number, skipping zero (reserved for
    /// unsolicited/server-initiated frames) and wrapping at 2^16.
    async fn next_sequence(&self) -> u16 {
        let mut guard = self.state.next_sequence.lock().await;
        *guard = guard.wrapping_add(1);
        if *guard == 0 {
            *guard = 1;
        }
        *guard
    }

    /// Send a frame and wait for its terminal reply, subject to one
    /// `idle_timeout` window. Non-terminal (`Progress`) frames for the same
    /// sequence are routed to the `progress` channel via [`dispatch`] and do
    /// not reset this deadline; idle-reset-on-progress is implemented one
    /// layer up, in the bridge's `request_with_progress`.
    pub async fn request(
        &self,
        command: Command,
        data: Vec<u8>,
        idle_timeout: Duration,
    ) -> Result<TcpFrame, MuxError> {
        let (frame, reply_rx) = self.send_request(command, data, None).await?;
        self.await_reply(frame.sequence_number, reply_rx, idle_timeout)
            .await
    }

    /// Like [`Self::request`] but also streams non-terminal frames (e.g.
    /// chunk acks/progress) to `progress_tx` as they arrive.
    pub async fn request_with_progress(
        &self,
        command: Command,
        data: Vec<u8>,
        idle_timeout: Duration,
        progress_tx: mpsc::UnboundedSender<TcpFrame>,
    ) -> Result<TcpFrame, MuxError> {
        let (frame, reply_rx) = self.send_request(command, data, Some(progress_tx)).await?;
        self.await_reply(frame.sequence_number, reply_rx, idle_timeout)
            .await
    }

    async fn send_request(
        &self,
        command: Command,
        data: Vec<u8>,
        progress: Option<mpsc::UnboundedSender<TcpFrame>>,
    ) -> Result<(TcpFrame, oneshot::Receiver<TcpFrame>), MuxError> {
        let sequence_number = self.next_sequence().await;
        let frame = TcpFrame::new(1, command, sequence_number, data);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.state.pending.lock().await;
            pending.insert(sequence_number, Pending { reply: reply_tx, progress });
        }

        let encoded = frame::encode(&frame);
        let mut writer = self.state.writer.lock().await;
        if let Err(err) = writer.write_all(&encoded).await {
            drop(writer);
            self.state.pending.lock().await.remove(&sequence_number);
            return Err(MuxError::Io(err));
        }

        Ok((frame, reply_rx))
    }

    async fn await_reply(
        &self,
        sequence_number: u16,
        reply_rx: oneshot::Receiver<TcpFrame>,
        idle_timeout: Duration,
    ) -> Result<TcpFrame, MuxError> {
        match timeout(idle_timeout, reply_rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(MuxError::ConnectionLost),
            Err(_) => {
                self.state.pending.lock().await.remove(&sequence_number);
                Err(MuxError::Timeout)
            }
        }
    }

    async fn read_loop(&self, mut reader: OwnedReadHalf) {
        let mut buf: Vec<u8> = Vec::with_capacity(64 * 1024);
        let mut chunk = [0u8; 16 * 1024];
        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => {
                    debug!("tcp read loop: connection closed");
                    self.fail_all_pending().await;
                    return;
                }
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);

            loop {
                match frame::decode(&buf) {
                    Ok(DecodeOutcome::Frame { frame, consumed }) => {
                        buf.drain(..consumed);
                        self.dispatch(frame).await;
                    }
                    Ok(DecodeOutcome::NeedMoreBytes) => break,
                    Err(err) => {
                        warn!("dropping connection on frame error: {err}");
                        self.fail_all_pending().await;
                        return;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, frame: TcpFrame) {
        let mut pending = self.state.pending.lock().await;
        let Some(entry) = pending.get(&frame.sequence_number) else {
            debug!(sequence = frame.sequence_number, "frame for unknown sequence, dropping");
            return;
        };

        if frame.command.is_terminal() {
            let entry = pending.remove(&frame.sequence_number).unwrap();
            drop(pending);
            let _ = entry.reply.send(frame);
        } else if let Some(progress) = &entry.progress {
            let _ = progress.send(frame);
        }
    }

    async fn fail_all_pending(&self) {
        let mut pending = self.state.pending.lock().await;
        for (_, entry) in pending.drain() {
            // Dropping `reply` without sending resolves the receiver with
            // `RecvError`, which `await_reply` maps to `ConnectionLost`.
            drop(entry.reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_idle_timeout_is_thirty_seconds() {
        assert_eq!(DEFAULT_IDLE_TIMEOUT, Duration::from_secs(30));
    }
}

#[cfg(test)]
mod loopback_tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (TcpMultiplexer, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (TcpMultiplexer::spawn(client), server)
    }

    async fn read_one_frame(stream: &mut TcpStream) -> TcpFrame {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            if let Ok(DecodeOutcome::Frame { frame, .. }) = frame::decode(&buf) {
                return frame;
            }
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn request_resolves_on_matching_terminal_reply() {
        let (mux, mut server) = loopback_pair().await;
        let handle = tokio::spawn({
            let mux = mux.clone();
            async move { mux.request(Command::Ping, Vec::new(), Duration::from_secs(5)).await }
        });

        let request = read_one_frame(&mut server).await;
        let reply = TcpFrame::new(1, Command::Success, request.sequence_number, Vec::new());
        server.write_all(&frame::encode(&reply)).await.unwrap();

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.command, Command::Success);
    }

    #[tokio::test]
    async fn corrupted_frame_closes_connection_and_fails_pending_requests() {
        let (mux, mut server) = loopback_pair().await;
        let handle = tokio::spawn({
            let mux = mux.clone();
            async move { mux.request(Command::Ping, Vec::new(), Duration::from_secs(5)).await }
        });

        let request = read_one_frame(&mut server).await;
        let mut corrupted =
            frame::encode(&TcpFrame::new(1, Command::Success, request.sequence_number, Vec::new()));
        let checksum_index = corrupted.len() - 3; // footer is checksum(1) + trailer(2)
        corrupted[checksum_index] ^= 0xFF;
        server.write_all(&corrupted).await.unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(MuxError::ConnectionLost)));
    }
}
