use std::sync::Arc;

use tracing::debug;

use parley_types::events::ServerEvent;
use parley_types::{ChatId, MessageId, UserId};

use crate::error::{DeliveryError, InvalidRequest};
use crate::registry::ConnectionRegistry;
use crate::store::{ChatStore, run_blocking};

/// Monotonic read watermarks, one per (chat, user).
#[derive(Clone)]
pub struct ReadReceiptTracker {
    registry: ConnectionRegistry,
    store: Arc<dyn ChatStore>,
}

impl ReadReceiptTracker {
    pub fn new(registry: ConnectionRegistry, store: Arc<dyn ChatStore>) -> Self {
        Self { registry, store }
    }

    /// Advance `user_id`'s watermark in `chat_id` to `upto`. An id at or below
    /// the current watermark changes nothing and pushes nothing. Returns the
    /// watermark after the call.
    pub async fn mark_read(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        upto: MessageId,
    ) -> Result<MessageId, DeliveryError> {
        let peer_id = run_blocking(&self.store, move |s| s.peer_of(chat_id, user_id))
            .await?
            .ok_or(InvalidRequest::NotParticipant)?;

        let message_chat = run_blocking(&self.store, move |s| s.message_chat(upto)).await?;
        if message_chat != Some(chat_id) {
            return Err(InvalidRequest::UnknownMessage.into());
        }

        let update = run_blocking(&self.store, move |s| {
            s.advance_read_watermark(chat_id, user_id, upto)
        })
        .await?;

        if update.advanced {
            self.registry.send(
                peer_id,
                ServerEvent::MessageRead {
                    chat_id,
                    user_id,
                    last_read_message_id: update.watermark,
                },
            );
        } else {
            debug!(
                "user {} read watermark in chat {} already at {}",
                user_id, chat_id, update.watermark
            );
        }

        Ok(update.watermark)
    }
}
