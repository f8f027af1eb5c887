use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, trace, warn};

use parley_types::events::{ClientFrame, ServerEvent};
use parley_types::{ChatId, UserId};

use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::store::{ChatStore, run_blocking};
use crate::subscriptions::SubscriptionTable;

/// Control-frame state machine for presence and typing.
///
/// Per (user, chat) a subscription is either absent or present. Presence of
/// a peer is only visible while both sides have the chat open.
///
/// Registering a connection, releasing one (with its disconnect cleanup) and
/// recording a subscription all happen under `lifecycle`, so a user's
/// online state and subscriptions change together.
#[derive(Clone)]
pub struct PresenceProtocol {
    registry: ConnectionRegistry,
    subscriptions: SubscriptionTable,
    store: Arc<dyn ChatStore>,
    lifecycle: Arc<Mutex<()>>,
}

impl PresenceProtocol {
    pub fn new(
        registry: ConnectionRegistry,
        subscriptions: SubscriptionTable,
        store: Arc<dyn ChatStore>,
    ) -> Self {
        Self {
            registry,
            subscriptions,
            store,
            lifecycle: Arc::new(Mutex::new(())),
        }
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    /// Register a live connection. The returned guard unregisters it when
    /// dropped and, if that was the user's last connection, runs disconnect
    /// handling.
    pub fn connect(&self, user_id: UserId, conn: ConnectionHandle) -> ConnectionGuard {
        let conn_id = conn.id();
        let _lifecycle = self.lock_lifecycle();
        self.registry.register(user_id, conn);
        ConnectionGuard {
            presence: self.clone(),
            user_id,
            conn_id,
        }
    }

    /// Apply one inbound frame. Returns a reply meant only for the
    /// connection the frame arrived on.
    pub async fn handle(&self, user_id: UserId, frame: ClientFrame) -> Option<ServerEvent> {
        match frame {
            ClientFrame::PresenceSubscribe { chat_id } => {
                self.subscribe(user_id, chat_id).await;
                None
            }
            ClientFrame::PresenceUnsubscribe { chat_id } => {
                self.subscriptions.unsubscribe(user_id, chat_id);
                trace!("user {} unsubscribed from chat {}", user_id, chat_id);
                None
            }
            ClientFrame::TypingStart { chat_id } => {
                self.relay_typing(user_id, chat_id, true).await;
                None
            }
            ClientFrame::TypingStop { chat_id } => {
                self.relay_typing(user_id, chat_id, false).await;
                None
            }
            ClientFrame::Ping => Some(ServerEvent::Pong),
            ClientFrame::Unknown => {
                debug!("user {} sent an unknown frame type, ignoring", user_id);
                None
            }
        }
    }

    /// Subscribing again while already subscribed re-announces presence.
    /// A frame that arrives after the user's last connection was released
    /// is dropped.
    async fn subscribe(&self, user_id: UserId, chat_id: ChatId) {
        let Some(peer_id) = self.peer_of(chat_id, user_id).await else {
            debug!("user {} cannot subscribe to chat {}: not a participant", user_id, chat_id);
            return;
        };

        let _lifecycle = self.lock_lifecycle();
        if !self.registry.is_online(user_id) {
            debug!("user {} went offline before subscribing to chat {}", user_id, chat_id);
            return;
        }

        self.subscriptions.subscribe(user_id, chat_id, peer_id);

        self.registry.send(
            user_id,
            ServerEvent::PresenceState {
                chat_id,
                user_id: peer_id,
                online: self.registry.is_online(peer_id),
            },
        );

        if self.subscriptions.is_subscribed(peer_id, chat_id) {
            self.registry.send(
                peer_id,
                ServerEvent::PresenceState {
                    chat_id,
                    user_id,
                    online: true,
                },
            );
        }
    }

    async fn relay_typing(&self, user_id: UserId, chat_id: ChatId, started: bool) {
        let Some(peer_id) = self.peer_of(chat_id, user_id).await else {
            debug!("user {} typing in chat {}: not a participant", user_id, chat_id);
            return;
        };

        if !self.subscriptions.is_subscribed(peer_id, chat_id) {
            return;
        }

        let event = if started {
            ServerEvent::TypingStart {
                chat_id,
                from_user_id: user_id,
            }
        } else {
            ServerEvent::TypingStop {
                chat_id,
                from_user_id: user_id,
            }
        };
        self.registry.send(peer_id, event);
    }

    /// Clear the user's subscriptions and tell every peer still watching a
    /// shared chat that the user went offline. Returns how many peers were
    /// notified. Caller holds `lifecycle`.
    fn disconnect(&self, user_id: UserId) -> usize {
        let mut notified = 0;
        for (chat_id, peer_id) in self.subscriptions.drain(user_id) {
            if self.subscriptions.is_subscribed(peer_id, chat_id) {
                self.registry.send(
                    peer_id,
                    ServerEvent::PresenceState {
                        chat_id,
                        user_id,
                        online: false,
                    },
                );
                notified += 1;
            }
        }
        notified
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store errors are treated like non-membership: the frame is ignored.
    async fn peer_of(&self, chat_id: ChatId, user_id: UserId) -> Option<UserId> {
        match run_blocking(&self.store, move |s| s.peer_of(chat_id, user_id)).await {
            Ok(peer) => peer,
            Err(e) => {
                warn!("membership lookup for chat {} failed: {}", chat_id, e);
                None
            }
        }
    }
}

/// Registration of one live connection, released exactly once on drop.
pub struct ConnectionGuard {
    presence: PresenceProtocol,
    user_id: UserId,
    conn_id: ConnectionId,
}

impl ConnectionGuard {
    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let _lifecycle = self.presence.lock_lifecycle();
        if self.presence.registry.unregister(self.user_id, self.conn_id) {
            let notified = self.presence.disconnect(self.user_id);
            info!(
                "user {} went offline ({} peers notified)",
                self.user_id, notified
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::testing::{Fixture, drain};

    fn presence_state(chat_id: ChatId, user_id: UserId, online: bool) -> ServerEvent {
        ServerEvent::PresenceState {
            chat_id,
            user_id,
            online,
        }
    }

    fn connect(
        fx: &Fixture,
        user_id: UserId,
    ) -> (ConnectionGuard, ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::open(16);
        let guard = fx.presence.connect(user_id, handle.clone());
        (guard, handle, rx)
    }

    #[tokio::test]
    async fn subscribe_reports_peer_state_symmetrically() {
        let fx = Fixture::new();
        let (_ga, _, mut rx_a) = connect(&fx, fx.alice);

        fx.presence
            .handle(fx.alice, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
            .await;
        assert_eq!(drain(&mut rx_a), vec![presence_state(fx.chat, fx.bob, false)]);

        let (_gb, _, mut rx_b) = connect(&fx, fx.bob);
        fx.presence
            .handle(fx.bob, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
            .await;
        assert_eq!(drain(&mut rx_b), vec![presence_state(fx.chat, fx.alice, true)]);
        assert_eq!(drain(&mut rx_a), vec![presence_state(fx.chat, fx.bob, true)]);
    }

    #[tokio::test]
    async fn subscribe_to_foreign_chat_is_silent() {
        let fx = Fixture::new();
        let (_gc, _, mut rx_c) = connect(&fx, fx.carol);
        let (_ga, _, mut rx_a) = connect(&fx, fx.alice);
        fx.presence
            .handle(fx.alice, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
            .await;
        drain(&mut rx_a);

        fx.presence
            .handle(fx.carol, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
            .await;
        fx.presence
            .handle(fx.carol, ClientFrame::PresenceSubscribe { chat_id: 999 })
            .await;

        assert!(drain(&mut rx_c).is_empty());
        assert!(drain(&mut rx_a).is_empty());
        assert!(fx.presence.subscriptions().chats(fx.carol).is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_sends_nothing() {
        let fx = Fixture::new();
        let (_ga, _, mut rx_a) = connect(&fx, fx.alice);
        let (_gb, _, mut rx_b) = connect(&fx, fx.bob);
        for user in [fx.alice, fx.bob] {
            fx.presence
                .handle(user, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
                .await;
        }
        drain(&mut rx_a);
        drain(&mut rx_b);

        fx.presence
            .handle(fx.alice, ClientFrame::PresenceUnsubscribe { chat_id: fx.chat })
            .await;
        assert!(!fx.presence.subscriptions().is_subscribed(fx.alice, fx.chat));
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn typing_reaches_only_a_watching_peer() {
        let fx = Fixture::new();
        let (_ga, _, _rx_a) = connect(&fx, fx.alice);
        let (_gb, _, mut rx_b) = connect(&fx, fx.bob);

        fx.presence
            .handle(fx.alice, ClientFrame::TypingStart { chat_id: fx.chat })
            .await;
        assert!(drain(&mut rx_b).is_empty());

        fx.presence
            .handle(fx.bob, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
            .await;
        drain(&mut rx_b);

        fx.presence
            .handle(fx.alice, ClientFrame::TypingStart { chat_id: fx.chat })
            .await;
        fx.presence
            .handle(fx.alice, ClientFrame::TypingStop { chat_id: fx.chat })
            .await;
        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerEvent::TypingStart {
                    chat_id: fx.chat,
                    from_user_id: fx.alice
                },
                ServerEvent::TypingStop {
                    chat_id: fx.chat,
                    from_user_id: fx.alice
                },
            ]
        );

        // Not a participant: nothing relayed
        fx.presence
            .handle(fx.carol, ClientFrame::TypingStart { chat_id: fx.chat })
            .await;
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn ping_and_unknown_frames() {
        let fx = Fixture::new();
        let (_ga, _, mut rx_a) = connect(&fx, fx.alice);

        assert_eq!(
            fx.presence.handle(fx.alice, ClientFrame::Ping).await,
            Some(ServerEvent::Pong)
        );
        assert_eq!(fx.presence.handle(fx.alice, ClientFrame::Unknown).await, None);
        assert!(drain(&mut rx_a).is_empty());
        assert!(fx.presence.subscriptions().chats(fx.alice).is_empty());
    }

    #[tokio::test]
    async fn disconnect_notifies_exactly_the_watching_peers() {
        let fx = Fixture::new();
        let (_ga, _, mut rx_a) = connect(&fx, fx.alice);
        let (_gb, _, mut rx_b) = connect(&fx, fx.bob);
        let (gc, _, mut rx_c) = connect(&fx, fx.carol);

        // Carol watches both of her chats; only Alice watches back.
        fx.presence
            .handle(fx.alice, ClientFrame::PresenceSubscribe { chat_id: fx.chat_ac })
            .await;
        fx.presence
            .handle(fx.carol, ClientFrame::PresenceSubscribe { chat_id: fx.chat_ac })
            .await;
        fx.presence
            .handle(fx.carol, ClientFrame::PresenceSubscribe { chat_id: fx.chat_bc })
            .await;
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        drop(gc);

        assert!(!fx.registry.is_online(fx.carol));
        assert!(fx.presence.subscriptions().chats(fx.carol).is_empty());
        assert_eq!(drain(&mut rx_a), vec![presence_state(fx.chat_ac, fx.carol, false)]);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn second_device_keeps_user_online() {
        let fx = Fixture::new();
        let (_ga, _, mut rx_a) = connect(&fx, fx.alice);
        let (gb1, _, _rx_b1) = connect(&fx, fx.bob);
        let (gb2, _, _rx_b2) = connect(&fx, fx.bob);
        for user in [fx.alice, fx.bob] {
            fx.presence
                .handle(user, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
                .await;
        }
        drain(&mut rx_a);

        drop(gb1);
        assert!(fx.registry.is_online(fx.bob));
        assert!(fx.presence.subscriptions().is_subscribed(fx.bob, fx.chat));
        assert!(drain(&mut rx_a).is_empty());

        drop(gb2);
        assert!(!fx.registry.is_online(fx.bob));
        assert_eq!(drain(&mut rx_a), vec![presence_state(fx.chat, fx.bob, false)]);
    }

    #[tokio::test]
    async fn resubscribe_refreshes_peer() {
        let fx = Fixture::new();
        let (_ga, _, mut rx_a) = connect(&fx, fx.alice);
        let (_gb, _, mut rx_b) = connect(&fx, fx.bob);
        for user in [fx.alice, fx.bob] {
            fx.presence
                .handle(user, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
                .await;
        }
        drain(&mut rx_a);
        drain(&mut rx_b);

        fx.presence
            .handle(fx.bob, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
            .await;
        assert_eq!(drain(&mut rx_a), vec![presence_state(fx.chat, fx.bob, true)]);
        assert_eq!(drain(&mut rx_b), vec![presence_state(fx.chat, fx.alice, true)]);
    }

    #[tokio::test]
    async fn subscribe_after_last_connection_is_ignored() {
        let fx = Fixture::new();
        let (_ga, _, mut rx_a) = connect(&fx, fx.alice);
        fx.presence
            .handle(fx.alice, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
            .await;
        drain(&mut rx_a);

        let (gb, _, _rx_b) = connect(&fx, fx.bob);
        drop(gb);
        drain(&mut rx_a);

        // A frame read before the socket closed, handled after release
        fx.presence
            .handle(fx.bob, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
            .await;

        assert!(!fx.presence.subscriptions().is_subscribed(fx.bob, fx.chat));
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reconnect_racing_disconnect_keeps_user_online() {
        for _ in 0..100 {
            let fx = Fixture::new();
            let (_ga, _, mut rx_a) = connect(&fx, fx.alice);
            let (gb1, _, _rx_b1) = connect(&fx, fx.bob);
            for user in [fx.alice, fx.bob] {
                fx.presence
                    .handle(user, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
                    .await;
            }
            drain(&mut rx_a);

            let closing = std::thread::spawn(move || drop(gb1));
            let (_gb2, _, _rx_b2) = connect(&fx, fx.bob);
            fx.presence
                .handle(fx.bob, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
                .await;
            closing.join().unwrap();

            assert!(fx.registry.is_online(fx.bob));
            assert!(fx.presence.subscriptions().is_subscribed(fx.bob, fx.chat));
            assert_eq!(
                drain(&mut rx_a).pop(),
                Some(presence_state(fx.chat, fx.bob, true))
            );
        }
    }

    #[tokio::test]
    async fn pruned_last_connection_still_notifies_once() {
        let fx = Fixture::new();
        let (_ga, _, mut rx_a) = connect(&fx, fx.alice);
        let (gb, _, rx_b) = connect(&fx, fx.bob);
        for user in [fx.alice, fx.bob] {
            fx.presence
                .handle(user, ClientFrame::PresenceSubscribe { chat_id: fx.chat })
                .await;
        }
        drain(&mut rx_a);

        // Bob's writer is gone; the next push to him prunes the connection
        drop(rx_b);
        fx.messages
            .send(fx.chat, fx.alice, Some("hi".into()), vec![])
            .await
            .unwrap();
        assert!(!fx.registry.is_online(fx.bob));
        assert!(drain(&mut rx_a).is_empty());

        drop(gb);
        assert_eq!(drain(&mut rx_a), vec![presence_state(fx.chat, fx.bob, false)]);
        assert!(fx.presence.subscriptions().chats(fx.bob).is_empty());
        assert_eq!(fx.presence.disconnect(fx.bob), 0);
    }
}
