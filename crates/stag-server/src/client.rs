//! Per-connection WebSocket client: reader and writer tasks.
//!
//! The reader parses and dispatches inbound frames and drives liveness (a
//! 60 s read deadline refreshed by pongs); the writer drains the bounded
//! send queue under a 10 s write deadline and emits protocol pings just
//! under the peer's read deadline. Each half is the sole user of its side
//! of the socket.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use stag_metrics::Metrics;
use stag_spatial::Repository;
use stag_types::api::ws_type;
use stag_types::{ApiError, ErrorBody, WsMessage};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::hub::{BroadcastMessage, ClientHandle, Hub, SEND_QUEUE_CAPACITY};

const READ_TIMEOUT: Duration = Duration::from_secs(60);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
// Just under the read deadline so peers see traffic in time.
const PING_PERIOD: Duration = Duration::from_secs(54);
const REPOSITORY_TIMEOUT: Duration = Duration::from_secs(5);

struct Client {
    id: Uuid,
    session_id: String,
    hub: Arc<Hub>,
    repository: Arc<Repository>,
    metrics: Arc<Metrics>,
    /// Weak end of the send queue; the hub owns the strong end, so queue
    /// closure stays under the unregister path.
    send: mpsc::WeakSender<String>,
}

/// Drive one upgraded connection until the socket dies, the hub evicts the
/// client, or the server shuts down.
pub async fn serve_connection(
    socket: WebSocket,
    session_id: String,
    hub: Arc<Hub>,
    repository: Arc<Repository>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<()>,
) {
    let (queue_tx, queue_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
    let id = Uuid::new_v4();

    let client = Client {
        id,
        session_id: session_id.clone(),
        hub: hub.clone(),
        repository,
        metrics: metrics.clone(),
        send: queue_tx.downgrade(),
    };

    hub.register(ClientHandle {
        id,
        session_id: session_id.clone(),
        sender: queue_tx,
    })
    .await;

    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(write_pump(ws_tx, queue_rx, metrics));

    client.read_pump(ws_rx, shutdown).await;

    hub.unregister(session_id, id).await;
    let _ = writer.await;
}

impl Client {
    async fn read_pump(&self, mut ws_rx: SplitStream<WebSocket>, mut shutdown: watch::Receiver<()>) {
        let mut deadline = Instant::now() + READ_TIMEOUT;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(session_id = %self.session_id, "read deadline exceeded");
                    break;
                }
                _ = shutdown.changed() => break,
                frame = ws_rx.next() => match frame {
                    None | Some(Ok(Message::Close(_))) => break,
                    Some(Err(e)) => {
                        tracing::error!(session_id = %self.session_id, error = %e, "websocket read error");
                        break;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        deadline = Instant::now() + READ_TIMEOUT;
                    }
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                    // Binary frames and pings (answered by the protocol
                    // layer) carry no application meaning here.
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let mut msg: WsMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "failed to parse message");
                self.send_error("INVALID_MESSAGE", "failed to parse message");
                return;
            }
        };
        if msg.session_id.is_empty() {
            msg.session_id = self.session_id.clone();
        }

        self.metrics
            .ws_messages_total
            .with_label_values(&["inbound", &msg.kind, "received"])
            .inc();

        match msg.kind.as_str() {
            ws_type::PING => self.handle_ping(&msg),
            ws_type::ANCHOR_UPDATE | ws_type::MESH_UPDATE => self.handle_data_update(&msg).await,
            other => {
                tracing::warn!(session_id = %self.session_id, kind = other, "unknown message type");
                self.send_error("UNKNOWN_TYPE", "unknown message type");
            }
        }
    }

    fn handle_ping(&self, msg: &WsMessage) {
        let pong = WsMessage {
            kind: ws_type::PONG.into(),
            session_id: msg.session_id.clone(),
            timestamp: Utc::now().timestamp_millis(),
            trace_id: msg.trace_id.clone(),
            ..Default::default()
        };
        match serde_json::to_string(&pong) {
            Ok(frame) => {
                if !self.enqueue(frame) {
                    tracing::warn!(session_id = %self.session_id, "send buffer full, dropping pong");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize pong"),
        }
    }

    async fn handle_data_update(&self, msg: &WsMessage) {
        let result = match tokio::time::timeout(
            REPOSITORY_TIMEOUT,
            self.repository.process_ws_message(msg),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ApiError::Internal("processing timed out".into())),
        };

        if let Err(e) = result {
            tracing::error!(session_id = %self.session_id, kind = %msg.kind, error = %e, "failed to process update");
            self.send_error("PROCESSING_ERROR", &e.to_string());
            self.metrics
                .ws_messages_total
                .with_label_values(&["inbound", &msg.kind, "error"])
                .inc();
            return;
        }

        self.metrics
            .ws_messages_total
            .with_label_values(&["inbound", &msg.kind, "success"])
            .inc();

        // Fan the envelope out, as received, to everyone else in the session.
        match serde_json::to_string(msg) {
            Ok(frame) => {
                self.hub
                    .broadcast(BroadcastMessage {
                        session_id: self.session_id.clone(),
                        message: frame,
                        exclude: Some(self.id),
                    })
                    .await;
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize broadcast"),
        }
    }

    fn send_error(&self, code: &str, message: &str) {
        let body = ErrorBody {
            code: code.into(),
            message: message.into(),
            details: None,
        };
        let frame = WsMessage {
            kind: ws_type::ERROR.into(),
            session_id: self.session_id.clone(),
            data: serde_json::to_value(&body).unwrap_or_default(),
            timestamp: Utc::now().timestamp_millis(),
            ..Default::default()
        };
        match serde_json::to_string(&frame) {
            Ok(frame) => {
                if self.enqueue(frame) {
                    self.metrics
                        .ws_messages_total
                        .with_label_values(&["outbound", "error", "sent"])
                        .inc();
                } else {
                    tracing::warn!(session_id = %self.session_id, "send buffer full, dropping error message");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize error frame"),
        }
    }

    /// Non-blocking enqueue onto the own send queue; false when the queue
    /// is full or already closed by the hub.
    fn enqueue(&self, frame: String) -> bool {
        match self.send.upgrade() {
            Some(sender) => sender.try_send(frame).is_ok(),
            None => false,
        }
    }
}

async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<String>,
    metrics: Arc<Metrics>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    loop {
        tokio::select! {
            item = queue.recv() => match item {
                Some(frame) => {
                    match tokio::time::timeout(WRITE_TIMEOUT, ws_tx.send(Message::Text(frame))).await {
                        Ok(Ok(())) => {
                            metrics
                                .ws_messages_total
                                .with_label_values(&["outbound", "data", "sent"])
                                .inc();
                        }
                        _ => return,
                    }
                }
                None => {
                    // Queue closed by the hub: say goodbye and stop.
                    let _ = tokio::time::timeout(WRITE_TIMEOUT, ws_tx.send(Message::Close(None))).await;
                    return;
                }
            },
            _ = ticker.tick() => {
                match tokio::time::timeout(WRITE_TIMEOUT, ws_tx.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
        }
    }
}
