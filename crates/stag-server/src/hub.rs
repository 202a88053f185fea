//! The session hub: a single-writer multiplexer over all live clients.
//!
//! All mutation of the session -> clients mapping flows through one loop
//! task fed by bounded channels; the map itself sits behind a read/write
//! lock so the broadcast snapshot and the connection-count endpoint can
//! read while the loop writes.
//!
//! A client's send queue is closed exactly once, by dropping the hub's
//! strong sender on the unregister path; the client's writer observes the
//! closed queue, emits a close frame, and exits.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use stag_metrics::Metrics;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Maximum live clients per session.
pub const MAX_CLIENTS_PER_SESSION: usize = 10;
/// Bounded outbound queue per client, in frames.
pub const SEND_QUEUE_CAPACITY: usize = 256;

const CONTROL_QUEUE_CAPACITY: usize = 64;

/// A registered client as the hub sees it: its identity and the strong end
/// of its send queue.
pub struct ClientHandle {
    pub id: Uuid,
    pub session_id: String,
    pub sender: mpsc::Sender<String>,
}

/// A frame to fan out to one session.
pub struct BroadcastMessage {
    pub session_id: String,
    pub message: String,
    /// Originating client, skipped during fan-out.
    pub exclude: Option<Uuid>,
}

/// Hub handle shared by the server and every client task.
pub struct Hub {
    clients: RwLock<HashMap<String, HashMap<Uuid, mpsc::Sender<String>>>>,
    register_tx: mpsc::Sender<ClientHandle>,
    unregister_tx: mpsc::Sender<(String, Uuid)>,
    broadcast_tx: mpsc::Sender<BroadcastMessage>,
    metrics: Arc<Metrics>,
}

/// The hub's event loop; consumed by `run`.
pub struct HubLoop {
    hub: Arc<Hub>,
    register_rx: mpsc::Receiver<ClientHandle>,
    unregister_rx: mpsc::Receiver<(String, Uuid)>,
    broadcast_rx: mpsc::Receiver<BroadcastMessage>,
}

impl Hub {
    pub fn new(metrics: Arc<Metrics>) -> (Arc<Self>, HubLoop) {
        let (register_tx, register_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);

        let hub = Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            register_tx,
            unregister_tx,
            broadcast_tx,
            metrics,
        });
        let hub_loop = HubLoop {
            hub: hub.clone(),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        (hub, hub_loop)
    }

    /// Hand a new client to the event loop.
    pub async fn register(&self, handle: ClientHandle) {
        let _ = self.register_tx.send(handle).await;
    }

    /// Ask the event loop to remove a client.
    pub async fn unregister(&self, session_id: String, id: Uuid) {
        let _ = self.unregister_tx.send((session_id, id)).await;
    }

    /// Enqueue a fan-out to every other client in the session.
    pub async fn broadcast(&self, msg: BroadcastMessage) {
        let _ = self.broadcast_tx.send(msg).await;
    }

    /// Number of live clients across all sessions.
    pub fn active_connections(&self) -> usize {
        self.clients.read().values().map(|session| session.len()).sum()
    }

    fn register_client(&self, handle: ClientHandle) {
        let mut clients = self.clients.write();
        let session = clients.entry(handle.session_id.clone()).or_default();

        if session.len() >= MAX_CLIENTS_PER_SESSION {
            tracing::warn!(
                session_id = %handle.session_id,
                max = MAX_CLIENTS_PER_SESSION,
                "session exceeded max connections"
            );
            // Dropping the only strong sender closes the queue; the
            // client's writer sends a close frame and exits.
            return;
        }

        session.insert(handle.id, handle.sender);
        self.metrics
            .ws_connections_active
            .with_label_values(&[&handle.session_id])
            .inc();
        tracing::info!(
            session_id = %handle.session_id,
            total = session.len(),
            "client connected"
        );
    }

    fn unregister_client(&self, session_id: &str, id: Uuid) {
        let mut clients = self.clients.write();
        if let Some(session) = clients.get_mut(session_id) {
            if session.remove(&id).is_some() {
                self.metrics
                    .ws_connections_active
                    .with_label_values(&[session_id])
                    .dec();
                let remaining = session.len();
                if session.is_empty() {
                    clients.remove(session_id);
                }
                tracing::info!(session_id, remaining, "client disconnected");
            }
        }
    }

    /// Fan a frame out to the session, returning the clients whose queues
    /// overflowed and must be evicted.
    fn broadcast_message(&self, msg: &BroadcastMessage) -> Vec<Uuid> {
        let targets: Vec<(Uuid, mpsc::Sender<String>)> = {
            let clients = self.clients.read();
            match clients.get(&msg.session_id) {
                Some(session) => session
                    .iter()
                    .map(|(id, sender)| (*id, sender.clone()))
                    .collect(),
                None => return Vec::new(),
            }
        };

        let mut evicted = Vec::new();
        for (id, sender) in targets {
            if msg.exclude == Some(id) {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(msg.message.clone()) {
                tracing::warn!(client_id = %id, "client send queue full, evicting");
                evicted.push(id);
            }
        }
        evicted
    }
}

impl HubLoop {
    /// Run until the shutdown channel fires or every hub handle is gone.
    pub async fn run(mut self, mut shutdown: watch::Receiver<()>) {
        loop {
            tokio::select! {
                handle = self.register_rx.recv() => match handle {
                    Some(handle) => self.hub.register_client(handle),
                    None => break,
                },
                key = self.unregister_rx.recv() => match key {
                    Some((session_id, id)) => self.hub.unregister_client(&session_id, id),
                    None => break,
                },
                msg = self.broadcast_rx.recv() => match msg {
                    Some(msg) => {
                        // Slow consumers are removed inline; routing the
                        // eviction back through the unregister channel
                        // could deadlock the loop against itself.
                        for id in self.hub.broadcast_message(&msg) {
                            self.hub.unregister_client(&msg.session_id, id);
                        }
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn hub() -> Arc<Hub> {
        Hub::new(Arc::new(Metrics::new().unwrap())).0
    }

    fn handle(session: &str, capacity: usize) -> (ClientHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            ClientHandle {
                id: Uuid::new_v4(),
                session_id: session.into(),
                sender: tx,
            },
            rx,
        )
    }

    #[test]
    fn session_cap_closes_the_rejected_queue() {
        let hub = hub();

        let mut receivers = Vec::new();
        for _ in 0..MAX_CLIENTS_PER_SESSION {
            let (h, rx) = handle("cap", 4);
            hub.register_client(h);
            receivers.push(rx);
        }
        assert_eq!(hub.active_connections(), MAX_CLIENTS_PER_SESSION);

        let (extra, mut extra_rx) = handle("cap", 4);
        hub.register_client(extra);
        assert_eq!(hub.active_connections(), MAX_CLIENTS_PER_SESSION);
        // The rejected client's queue is closed, not merely empty.
        assert!(matches!(extra_rx.try_recv(), Err(TryRecvError::Disconnected)));

        // Accepted clients are untouched.
        assert!(matches!(receivers[0].try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn broadcast_skips_the_excluded_sender() {
        let hub = hub();
        let (a, mut a_rx) = handle("s2", 4);
        let (b, mut b_rx) = handle("s2", 4);
        let a_id = a.id;
        hub.register_client(a);
        hub.register_client(b);

        let evicted = hub.broadcast_message(&BroadcastMessage {
            session_id: "s2".into(),
            message: "hello".into(),
            exclude: Some(a_id),
        });
        assert!(evicted.is_empty());
        assert_eq!(b_rx.try_recv().unwrap(), "hello");
        assert!(matches!(a_rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn overflowing_client_is_reported_for_eviction() {
        let hub = hub();
        let (slow, mut slow_rx) = handle("s3", 1);
        let slow_id = slow.id;
        hub.register_client(slow);

        let msg = BroadcastMessage {
            session_id: "s3".into(),
            message: "frame".into(),
            exclude: None,
        };
        assert!(hub.broadcast_message(&msg).is_empty());
        let evicted = hub.broadcast_message(&msg);
        assert_eq!(evicted, vec![slow_id]);

        hub.unregister_client("s3", slow_id);
        assert_eq!(hub.active_connections(), 0);

        // The queue closes once the hub's sender is gone; the one buffered
        // frame is still delivered first.
        assert_eq!(slow_rx.try_recv().unwrap(), "frame");
        assert!(matches!(slow_rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn unregister_is_idempotent_and_prunes_empty_sessions() {
        let hub = hub();
        let (h, _rx) = handle("s4", 4);
        let id = h.id;
        hub.register_client(h);
        assert_eq!(hub.active_connections(), 1);

        hub.unregister_client("s4", id);
        hub.unregister_client("s4", id);
        assert_eq!(hub.active_connections(), 0);
        assert!(hub.clients.read().get("s4").is_none());
    }

    #[tokio::test]
    async fn event_loop_evicts_slow_consumers() {
        let (hub, hub_loop) = Hub::new(Arc::new(Metrics::new().unwrap()));
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let task = tokio::spawn(hub_loop.run(shutdown_rx));

        let (fast, mut fast_rx) = handle("s5", 16);
        let (slow, _slow_rx) = handle("s5", 1);
        hub.register(fast).await;
        hub.register(slow).await;

        // Registrations and broadcasts travel on separate channels; wait
        // for both clients to land before flooding.
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while hub.active_connections() != 2 {
            assert!(tokio::time::Instant::now() < deadline, "clients not registered");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        // Two broadcasts: the second overflows the slow client's queue.
        for _ in 0..2 {
            hub.broadcast(BroadcastMessage {
                session_id: "s5".into(),
                message: "m".into(),
                exclude: None,
            })
            .await;
        }

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while hub.active_connections() != 1 {
            assert!(tokio::time::Instant::now() < deadline, "slow client not evicted");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(fast_rx.recv().await.as_deref(), Some("m"));
        assert_eq!(fast_rx.recv().await.as_deref(), Some("m"));

        let _ = shutdown_tx.send(());
        let _ = task.await;
    }
}
