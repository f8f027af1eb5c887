use std::sync::Arc;

use tracing::debug;

use parley_types::events::ServerEvent;
use parley_types::models::Message;
use parley_types::{ChatId, UserId};

use crate::error::{DeliveryError, InvalidRequest};
use crate::registry::ConnectionRegistry;
use crate::store::{ChatStore, run_blocking};

/// Validate, persist, then push a new message to the other participant.
#[derive(Clone)]
pub struct MessagePipeline {
    registry: ConnectionRegistry,
    store: Arc<dyn ChatStore>,
}

impl MessagePipeline {
    pub fn new(registry: ConnectionRegistry, store: Arc<dyn ChatStore>) -> Self {
        Self { registry, store }
    }

    /// Text is trimmed and unknown attachment ids are dropped; what remains
    /// must contain text or at least one attachment.
    /// The push happens only after the message is committed and a failed
    /// push never affects the stored message.
    pub async fn send(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        text: Option<String>,
        attachment_ids: Vec<i64>,
    ) -> Result<Message, DeliveryError> {
        let peer_id = run_blocking(&self.store, move |s| s.peer_of(chat_id, sender_id))
            .await?
            .ok_or(InvalidRequest::NotParticipant)?;

        let text = text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let attachment_ids = if attachment_ids.is_empty() {
            attachment_ids
        } else {
            run_blocking(&self.store, move |s| s.existing_files(&attachment_ids)).await?
        };
        if text.is_none() && attachment_ids.is_empty() {
            return Err(DeliveryError::EmptyMessage);
        }

        let message = run_blocking(&self.store, move |s| {
            s.insert_message(chat_id, sender_id, text.as_deref(), &attachment_ids)
        })
        .await?;

        let delivered = self.registry.send(
            peer_id,
            ServerEvent::MessageNew {
                chat_id,
                message: message.clone(),
            },
        );
        debug!(
            "message {} in chat {} pushed to {} connection(s) of user {}",
            message.id, chat_id, delivered, peer_id
        );

        Ok(message)
    }
}
