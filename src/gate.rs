//! RPC client for the gate (the QR/relay orchestrator).
//!
//! One outbound WebSocket carries concurrent request/response pairs,
//! correlated by a monotonically increasing `_requestId`. The pending
//! table is shared between the sending call and the reader task; every
//! entry is resolved exactly once — by its reply, by its own 30 s request
//! timeout, or by connection teardown. Stale or uncorrelated replies are
//! logged and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};
use crate::wire::Envelope;

/// Default gate connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-request reply timeout, independent of the connect timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Envelope>>>>>;

/// Client side of the gate RPC connection.
#[derive(Debug)]
pub struct GateClient {
    tx: mpsc::UnboundedSender<Message>,
    pending: PendingTable,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl GateClient {
    /// Connect with the default connect timeout.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_timeout(url, CONNECT_TIMEOUT).await
    }

    /// Connect with a custom timeout.
    pub async fn connect_with_timeout(url: &str, connect_timeout: Duration) -> Result<Self> {
        let (ws, _response) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| Error::GateTimeout(connect_timeout.as_millis() as u64))?
            .map_err(|e| Error::GateUnavailable(e.to_string()))?;

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));

        // Writer task: the only owner of the sink, so sends and the final
        // close frame are serialized.
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if ws_tx.send(msg).await.is_err() || is_close {
                    break;
                }
            }
        });

        // Reader task: resolves pending requests, then rejects whatever is
        // left when the connection goes away.
        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Binary(bytes)) => {
                        Self::dispatch_reply(&reader_pending, &bytes);
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }

            let drained: Vec<_> = reader_pending.lock().drain().collect();
            for (id, waiter) in drained {
                tracing::debug!("rejecting pending gate request {id}: connection closed");
                let _ = waiter.send(Err(Error::GateClosed));
            }
        });

        Ok(Self {
            tx,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    /// Override the per-request timeout (mainly for tests).
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn dispatch_reply(pending: &PendingTable, bytes: &[u8]) {
        let envelope = match Envelope::decode(bytes) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!("discarding undecodable gate frame: {e}");
                return;
            }
        };

        let Some(id) = envelope.request_id() else {
            tracing::warn!("discarding gate reply without _requestId");
            return;
        };

        let Some(waiter) = pending.lock().remove(&id) else {
            tracing::warn!("discarding gate reply for unknown request {id}");
            return;
        };

        let outcome = match envelope {
            Envelope::Error { message, .. } => {
                let message = if message.is_empty() {
                    "gate request failed".to_string()
                } else {
                    message
                };
                Err(Error::GateRejected(message))
            }
            other => Ok(other),
        };
        // The waiter may already have timed out; nothing to do then.
        let _ = waiter.send(outcome);
    }

    /// Send one correlated request and await its reply.
    async fn request(&self, build: impl FnOnce(u64) -> Envelope) -> Result<Envelope> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(id, reply_tx);

        let frame = Message::Binary(build(id).encode());
        if self.tx.send(frame).is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::GateClosed);
        }

        match timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            // Reader task dropped the sender: connection torn down.
            Ok(Err(_)) => Err(Error::GateClosed),
            Err(_) => {
                // Late replies now find no entry and are dropped.
                self.pending.lock().remove(&id);
                Err(Error::RequestTimeout)
            }
        }
    }

    /// Ask the gate to mint a scannable login task.
    ///
    /// `payload` is the encrypted session link secret (base64) embedded in
    /// the QR target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GateRejected`] when the gate reports a non-ok
    /// status, on top of the transport-level connect/timeout errors.
    pub async fn create_task(&self, project_id: &str, payload: &str) -> Result<String> {
        let project_id = project_id.to_string();
        let payload = payload.to_string();
        let reply = self
            .request(move |id| Envelope::CreateTask {
                request_id: Some(id),
                project_id: Some(project_id),
                payload: Some(payload),
                status: None,
                link_web: None,
            })
            .await?;

        match reply {
            Envelope::CreateTask {
                status: Some(status),
                link_web,
                ..
            } if status == "ok" => {
                link_web.ok_or_else(|| Error::GateRejected("reply carried no linkWeb".into()))
            }
            Envelope::CreateTask { status, .. } => Err(Error::GateRejected(format!(
                "task not created (status: {})",
                status.unwrap_or_else(|| "missing".into())
            ))),
            other => Err(Error::GateRejected(format!(
                "unexpected reply envelope: {other:?}"
            ))),
        }
    }

    /// Close the connection. Pending requests are rejected by the reader
    /// task once the close completes.
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }
}
