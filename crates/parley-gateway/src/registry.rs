use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::UserId;
use parley_types::events::ServerEvent;

pub type ConnectionId = Uuid;

/// Result of a single non-blocking enqueue onto a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The outbound queue is at capacity; the event was dropped for this connection.
    Full,
    /// The connection's writer is gone.
    Closed,
}

/// Sending half of one live connection. The matching receiver is drained by
/// the connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a connection with an outbound queue of `buffer` events.
    pub fn open(buffer: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue without waiting. Never blocks on a slow consumer.
    pub fn push(&self, event: ServerEvent) -> PushOutcome {
        match self.tx.try_send(event) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(_)) => PushOutcome::Full,
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }
}

/// Live connections per user. A user may hold any number of connections
/// (one per device or tab).
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection for `user`. Registering the same handle twice is a no-op.
    pub fn register(&self, user_id: UserId, conn: ConnectionHandle) {
        let mut users = self.inner.write().unwrap_or_else(|e| e.into_inner());
        users.entry(user_id).or_default().insert(conn.id, conn);
    }

    /// Remove a connection. Returns true if the user has no connections left.
    pub fn unregister(&self, user_id: UserId, conn_id: ConnectionId) -> bool {
        let mut users = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(conns) = users.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                users.remove(&user_id);
            }
        }
        !users.contains_key(&user_id)
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&user_id)
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .map_or(0, HashMap::len)
    }

    /// Best-effort fan-out of `event` to every connection of `user`.
    ///
    /// Iterates over a snapshot taken at call time, so concurrent register or
    /// unregister calls never disturb delivery to the remaining connections.
    /// Each connection gets one non-blocking attempt; full queues drop the
    /// event, closed ones are pruned afterwards. Returns how many connections
    /// accepted the event.
    pub fn send(&self, user_id: UserId, event: ServerEvent) -> usize {
        let snapshot: Vec<ConnectionHandle> = {
            let users = self.inner.read().unwrap_or_else(|e| e.into_inner());
            match users.get(&user_id) {
                Some(conns) => conns.values().cloned().collect(),
                None => return 0,
            }
        };

        let mut queued = 0;
        let mut dead = Vec::new();
        for conn in &snapshot {
            match conn.push(event.clone()) {
                PushOutcome::Queued => queued += 1,
                PushOutcome::Full => {
                    warn!("Outbound queue full for user {} conn {}, dropping event", user_id, conn.id);
                }
                PushOutcome::Closed => dead.push(conn.id),
            }
        }

        if !dead.is_empty() {
            self.prune(user_id, &dead);
        }

        queued
    }

    fn prune(&self, user_id: UserId, dead: &[ConnectionId]) {
        let mut users = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(conns) = users.get_mut(&user_id) {
            for id in dead {
                if conns.remove(id).is_some() {
                    debug!("Pruned dead connection {} of user {}", id, user_id);
                }
            }
            if conns.is_empty() {
                users.remove(&user_id);
            }
        }
    }
}
