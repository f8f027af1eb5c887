//! Shared fixtures for unit tests.

use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::sync::mpsc;

use parley_db::Database;
use parley_types::events::ServerEvent;
use parley_types::models::Message;
use parley_types::{ChatId, MessageId, UserId};

use crate::pipeline::MessagePipeline;
use crate::presence::PresenceProtocol;
use crate::receipts::ReadReceiptTracker;
use crate::registry::ConnectionRegistry;
use crate::store::{ChatStore, WatermarkUpdate};
use crate::subscriptions::SubscriptionTable;

/// Alice, Bob and Carol with a chat for every pair.
pub struct Fixture {
    pub db: Arc<Database>,
    pub registry: ConnectionRegistry,
    pub presence: PresenceProtocol,
    pub messages: MessagePipeline,
    pub receipts: ReadReceiptTracker,
    pub alice: UserId,
    pub bob: UserId,
    pub carol: UserId,
    /// alice <-> bob
    pub chat: ChatId,
    pub chat_ac: ChatId,
    pub chat_bc: ChatId,
}

impl Fixture {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = db.create_user("alice", "x").unwrap().unwrap();
        let bob = db.create_user("bob", "x").unwrap().unwrap();
        let carol = db.create_user("carol", "x").unwrap().unwrap();
        let chat = db.get_or_create_chat(alice, bob).unwrap().0.id;
        let chat_ac = db.get_or_create_chat(alice, carol).unwrap().0.id;
        let chat_bc = db.get_or_create_chat(bob, carol).unwrap().0.id;

        let store: Arc<dyn ChatStore> = db.clone();
        let registry = ConnectionRegistry::new();
        let presence = PresenceProtocol::new(registry.clone(), SubscriptionTable::new(), store.clone());

        Self {
            messages: MessagePipeline::new(registry.clone(), store.clone()),
            receipts: ReadReceiptTracker::new(registry.clone(), store),
            db,
            registry,
            presence,
            alice,
            bob,
            carol,
            chat,
            chat_ac,
            chat_bc,
        }
    }
}

/// Stand-in for a blob registered by the external file store.
pub fn insert_file(db: &Database, owner_id: UserId, name: &str, mime: &str) -> i64 {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO files (owner_id, original_name, mime, size) VALUES (?1, ?2, ?3, 0)",
            (owner_id, name, mime),
        )?;
        Ok(conn.last_insert_rowid())
    })
    .unwrap()
}

/// Everything currently queued on a connection.
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Reads pass through; every write fails.
pub struct FailingStore(pub Arc<Database>);

impl ChatStore for FailingStore {
    fn peer_of(&self, chat_id: ChatId, user_id: UserId) -> Result<Option<UserId>> {
        self.0.peer_of(chat_id, user_id)
    }

    fn insert_message(&self, _: ChatId, _: UserId, _: Option<&str>, _: &[i64]) -> Result<Message> {
        bail!("disk full")
    }

    fn message_chat(&self, message_id: MessageId) -> Result<Option<ChatId>> {
        self.0.message_chat(message_id)
    }

    fn existing_files(&self, file_ids: &[i64]) -> Result<Vec<i64>> {
        self.0.existing_files(file_ids)
    }

    fn advance_read_watermark(&self, _: ChatId, _: UserId, _: MessageId) -> Result<WatermarkUpdate> {
        bail!("disk full")
    }
}
