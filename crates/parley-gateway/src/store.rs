use std::sync::Arc;

use anyhow::{Result, anyhow};

use parley_db::Database;
use parley_types::models::Message;
use parley_types::{ChatId, MessageId, UserId};

/// Outcome of a conditional watermark advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkUpdate {
    pub advanced: bool,
    pub watermark: MessageId,
}

/// The persistence collaborator consumed by the delivery core.
///
/// Calls are blocking; async callers go through [`run_blocking`].
pub trait ChatStore: Send + Sync + 'static {
    /// The other participant of `chat_id`, or `None` if the chat does not
    /// exist or `user_id` is not a member.
    fn peer_of(&self, chat_id: ChatId, user_id: UserId) -> Result<Option<UserId>>;

    /// Persist a message and its attachment links as one unit.
    fn insert_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        text: Option<&str>,
        attachment_ids: &[i64],
    ) -> Result<Message>;

    fn message_chat(&self, message_id: MessageId) -> Result<Option<ChatId>>;

    /// The subset of `file_ids` that reference known files, in request order
    /// and without duplicates.
    fn existing_files(&self, file_ids: &[i64]) -> Result<Vec<i64>>;

    /// Raise the watermark to `upto` only if it is currently lower.
    fn advance_read_watermark(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        upto: MessageId,
    ) -> Result<WatermarkUpdate>;
}

/// Run a store call off the async runtime.
pub async fn run_blocking<F, T>(store: &Arc<dyn ChatStore>, f: F) -> Result<T>
where
    F: FnOnce(&dyn ChatStore) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}

impl ChatStore for Database {
    fn peer_of(&self, chat_id: ChatId, user_id: UserId) -> Result<Option<UserId>> {
        Ok(self.get_chat(chat_id)?.and_then(|chat| chat.other(user_id)))
    }

    fn insert_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        text: Option<&str>,
        attachment_ids: &[i64],
    ) -> Result<Message> {
        let (row, attachments) = Database::insert_message(self, chat_id, sender_id, text, attachment_ids)?;
        Ok(row.into_message(attachments.into_iter().map(|a| a.into_attachment()).collect()))
    }

    fn message_chat(&self, message_id: MessageId) -> Result<Option<ChatId>> {
        self.get_message_chat(message_id)
    }

    fn existing_files(&self, file_ids: &[i64]) -> Result<Vec<i64>> {
        Database::existing_files(self, file_ids)
    }

    fn advance_read_watermark(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        upto: MessageId,
    ) -> Result<WatermarkUpdate> {
        let (advanced, watermark) = Database::advance_read_watermark(self, chat_id, user_id, upto)?;
        Ok(WatermarkUpdate { advanced, watermark })
    }
}
