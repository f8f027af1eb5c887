use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use parley_types::{ChatId, UserId};

/// Which chats each user currently has open.
///
/// Chat membership never changes, so each subscription also records the
/// chat's other participant; disconnect cleanup then needs no store lookups.
#[derive(Clone, Default)]
pub struct SubscriptionTable {
    inner: Arc<RwLock<HashMap<UserId, HashMap<ChatId, UserId>>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the subscription is new.
    pub fn subscribe(&self, user_id: UserId, chat_id: ChatId, peer_id: UserId) -> bool {
        let mut users = self.inner.write().unwrap_or_else(|e| e.into_inner());
        users
            .entry(user_id)
            .or_default()
            .insert(chat_id, peer_id)
            .is_none()
    }

    /// Returns true if a subscription was removed.
    pub fn unsubscribe(&self, user_id: UserId, chat_id: ChatId) -> bool {
        let mut users = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(chats) = users.get_mut(&user_id) else {
            return false;
        };
        let removed = chats.remove(&chat_id).is_some();
        if chats.is_empty() {
            users.remove(&user_id);
        }
        removed
    }

    pub fn is_subscribed(&self, user_id: UserId, chat_id: ChatId) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .is_some_and(|chats| chats.contains_key(&chat_id))
    }

    /// The user's subscribed chats, ascending.
    pub fn chats(&self, user_id: UserId) -> Vec<ChatId> {
        let users = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut chats: Vec<ChatId> = users
            .get(&user_id)
            .map(|chats| chats.keys().copied().collect())
            .unwrap_or_default();
        chats.sort_unstable();
        chats
    }

    /// Remove and return every (chat, peer) the user was subscribed to.
    /// A second call for the same user returns nothing.
    pub fn drain(&self, user_id: UserId) -> Vec<(ChatId, UserId)> {
        let mut users = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut drained: Vec<(ChatId, UserId)> = users
            .remove(&user_id)
            .map(|chats| chats.into_iter().collect())
            .unwrap_or_default();
        drained.sort_unstable();
        drained
    }
}
