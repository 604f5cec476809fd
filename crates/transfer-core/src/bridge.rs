//! Bridge/Router (C7): one duplex channel between a caller and the
//! transport-owning worker, correlating outbound requests with their
//! single terminal response and zero-or-more progress events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use transfer_types::{generate_request_id, BackendResponse, ProgressInfo, Request};

use crate::error::TransferError;

/// What the Bridge sends to whatever owns the transport worker.
pub type Outbound = Request;

/// What the transport worker sends back over the same duplex channel.
#[derive(Debug, Clone)]
pub enum Inbound {
    Response { request_id: String, response: BackendResponse },
    Progress { request_id: String, progress: ProgressInfo },
}

struct PendingRequest {
    reply: oneshot::Sender<BackendResponse>,
}

struct BridgeState {
    response_handlers: Mutex<HashMap<String, PendingRequest>>,
    progress_handlers: Mutex<HashMap<String, mpsc::UnboundedSender<ProgressInfo>>>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

/// Handle callers use to issue requests. Cloning shares the same router
/// task and handler tables (it's an `Arc` handle, mirroring `TcpMultiplexer`).
#[derive(Clone)]
pub struct Bridge {
    state: Arc<BridgeState>,
}

impl Bridge {
    /// Spawn the single-owner router task over an already-connected duplex
    /// channel pair. The request table is mutated only from within this
    /// task; callers only ever go through typed messages (spec §5).
    pub fn spawn(
        outbound: mpsc::UnboundedSender<Outbound>,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
    ) -> Self {
        let state = Arc::new(BridgeState {
            response_handlers: Mutex::new(HashMap::new()),
            progress_handlers: Mutex::new(HashMap::new()),
            outbound,
        });
        let bridge = Self { state };
        let router = bridge.clone();
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                router.dispatch(event).await;
            }
            router.fail_all_pending().await;
        });
        bridge
    }

    /// Issue a request and await its single terminal response, discarding
    /// any progress events along the way.
    pub async fn request(
        &self,
        command: &str,
        payload: Value,
        timeout_ms: u64,
    ) -> Result<BackendResponse, TransferError> {
        self.request_with_progress(command, payload, timeout_ms, None).await
    }

    /// Issue a request, forwarding progress events to `progress` as they
    /// arrive and resetting the idle timer on each one (spec §4.7/§8
    /// invariant 3).
    pub async fn request_with_progress(
        &self,
        command: &str,
        payload: Value,
        timeout_ms: u64,
        progress: Option<mpsc::UnboundedSender<ProgressInfo>>,
    ) -> Result<BackendResponse, TransferError> {
        let request_id = generate_request_id(command);
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<ProgressInfo>();

        {
            let mut handlers = self.state.response_handlers.lock().await;
            handlers.insert(request_id.clone(), PendingRequest { reply: reply_tx });
        }
        self.state.progress_handlers.lock().await.insert(request_id.clone(), internal_tx);

        let request = Request {
            request_id: request_id.clone(),
            command: command.to_string(),
            payload,
            timeout_ms,
        };
        if self.state.outbound.send(request).is_err() {
            self.forget(&request_id).await;
            return Err(TransferError::Connection("bridge channel closed".to_string()));
        }

        let timeout_duration = Duration::from_millis(timeout_ms);
        let deadline = tokio::time::sleep(timeout_duration);
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                response = &mut reply_rx => {
                    break match response {
                        Ok(response) => Ok(response),
                        Err(_) => Err(TransferError::Connection("bridge channel closed".to_string())),
                    };
                }
                Some(info) = internal_rx.recv() => {
                    if let Some(caller_tx) = &progress {
                        let _ = caller_tx.send(info);
                    }
                    deadline.as_mut().reset(Instant::now() + timeout_duration);
                }
                _ = &mut deadline => {
                    break Err(TransferError::Timeout);
                }
            }
        };

        self.state.progress_handlers.lock().await.remove(&request_id);
        if matches!(result, Err(TransferError::Timeout)) {
            self.state.response_handlers.lock().await.remove(&request_id);
        }
        result
    }

    async fn forget(&self, request_id: &str) {
        self.state.response_handlers.lock().await.remove(request_id);
        self.state.progress_handlers.lock().await.remove(request_id);
    }

    async fn dispatch(&self, event: Inbound) {
        match event {
            Inbound::Response { request_id, response } => {
                let mut handlers = self.state.response_handlers.lock().await;
                if let Some(pending) = handlers.remove(&request_id) {
                    let _ = pending.reply.send(response);
                } else {
                    debug!(request_id, "response for unknown/expired request, dropping");
                }
            }
            Inbound::Progress { request_id, progress } => {
                let handlers = self.state.progress_handlers.lock().await;
                match handlers.get(&request_id) {
                    Some(sender) => {
                        let _ = sender.send(progress);
                    }
                    None => debug!(request_id, "progress for unknown requestId, dropping"),
                }
            }
        }
    }

    async fn fail_all_pending(&self) {
        let mut handlers = self.state.response_handlers.lock().await;
        for (_, pending) in handlers.drain() {
            drop(pending.reply);
        }
        warn!("bridge router loop ended, outstanding requests failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transfer_types::{Direction, TransportKind};

    fn make_progress(loaded: u64, total: u64) -> ProgressInfo {
        ProgressInfo {
            loaded,
            total,
            filename: "f.bin".to_string(),
            direction: Direction::Upload,
            transport: TransportKind::Http,
        }
    }

    #[tokio::test]
    async fn request_resolves_on_matching_response() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let bridge = Bridge::spawn(out_tx, in_rx);

        let bridge_clone = bridge.clone();
        let handle = tokio::spawn(async move {
            bridge_clone.request("backend.http.listFiles", serde_json::json!({}), 5_000).await
        });

        let outbound = out_rx.recv().await.unwrap();
        in_tx
            .send(Inbound::Response {
                request_id: outbound.request_id,
                response: BackendResponse::ok_empty(),
            })
            .unwrap();

        let response = handle.await.unwrap().unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn unknown_request_id_response_is_dropped_not_panicking() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _bridge = Bridge::spawn(out_tx, in_rx);
        in_tx
            .send(Inbound::Response {
                request_id: "ghost".to_string(),
                response: BackendResponse::ok_empty(),
            })
            .unwrap();
        // No panic, no hang: dropping the sender lets the test end cleanly.
    }

    #[tokio::test]
    async fn progress_resets_idle_timer_past_declared_timeout() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let bridge = Bridge::spawn(out_tx, in_rx);

        let bridge_clone = bridge.clone();
        let handle = tokio::spawn(async move {
            bridge_clone
                .request_with_progress("backend.tcp.upload", serde_json::json!({}), 200, None)
                .await
        });

        let outbound = out_rx.recv().await.unwrap();
        // Trickle progress slower than the 200ms timeout but for longer
        // than 200ms total; the request must still complete successfully
        // because each progress event re-arms the deadline.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(120)).await;
            in_tx
                .send(Inbound::Progress {
                    request_id: outbound.request_id.clone(),
                    progress: make_progress(1, 10),
                })
                .unwrap();
        }
        in_tx
            .send(Inbound::Response {
                request_id: outbound.request_id.clone(),
                response: BackendResponse::ok_empty(),
            })
            .unwrap();

        let response = handle.await.unwrap().unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn timeout_without_response_surfaces_timeout_error() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let bridge = Bridge::spawn(out_tx, in_rx);

        let handle = tokio::spawn(async move {
            bridge.request("backend.http.listFiles", serde_json::json!({}), 50).await
        });
        let _outbound = out_rx.recv().await.unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, TransferError::Timeout));
    }
}
