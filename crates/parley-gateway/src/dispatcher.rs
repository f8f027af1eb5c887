use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use parley_types::UserId;
use parley_types::events::ServerEvent;

use crate::pipeline::MessagePipeline;
use crate::presence::{ConnectionGuard, PresenceProtocol};
use crate::receipts::ReadReceiptTracker;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::store::ChatStore;
use crate::subscriptions::SubscriptionTable;

/// Outbound queue capacity per connection.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub outbound_buffer: usize,
    pub heartbeat_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// The delivery core: one shared registry and subscription table, plus the
/// request paths that push through them. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    registry: ConnectionRegistry,
    presence: PresenceProtocol,
    messages: MessagePipeline,
    receipts: ReadReceiptTracker,
    config: GatewayConfig,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ChatStore>, config: GatewayConfig) -> Self {
        let registry = ConnectionRegistry::new();
        let subscriptions = SubscriptionTable::new();

        Self {
            presence: PresenceProtocol::new(registry.clone(), subscriptions, store.clone()),
            messages: MessagePipeline::new(registry.clone(), store.clone()),
            receipts: ReadReceiptTracker::new(registry.clone(), store),
            registry,
            config,
        }
    }

    pub fn presence(&self) -> &PresenceProtocol {
        &self.presence
    }

    pub fn messages(&self) -> &MessagePipeline {
        &self.messages
    }

    pub fn receipts(&self) -> &ReadReceiptTracker {
        &self.receipts
    }

    pub fn config(&self) -> GatewayConfig {
        self.config
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.registry.is_online(user_id)
    }

    /// Open and register a new connection for `user_id`.
    pub fn open_connection(
        &self,
        user_id: UserId,
    ) -> (ConnectionGuard, ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::open(self.config.outbound_buffer);
        let guard = self.presence.connect(user_id, handle.clone());
        (guard, handle, rx)
    }
}
