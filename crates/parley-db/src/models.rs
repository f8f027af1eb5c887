//! Database row types, mapped directly from SQLite rows.
//! Distinct from parley-types API models to keep the DB layer independent.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use parley_types::models::{Attachment, Message, UserPublic, file_url};
use parley_types::{ChatId, MessageId, UserId};

pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub avatar_file_id: Option<i64>,
    pub created_at: String,
}

impl UserRow {
    pub fn public(&self) -> UserPublic {
        UserPublic::new(self.id, self.username.clone(), self.avatar_file_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatRow {
    pub id: ChatId,
    pub user1_id: UserId,
    pub user2_id: UserId,
}

impl ChatRow {
    /// The other participant, or `None` if `me` is not in this chat.
    pub fn other(&self, me: UserId) -> Option<UserId> {
        if self.user1_id == me {
            Some(self.user2_id)
        } else if self.user2_id == me {
            Some(self.user1_id)
        } else {
            None
        }
    }
}

pub struct MessageRow {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub text: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self, attachments: Vec<Attachment>) -> Message {
        let created_at = parse_timestamp(&self.created_at).unwrap_or_else(|| {
            warn!("Corrupt created_at '{}' on message {}", self.created_at, self.id);
            DateTime::default()
        });

        Message {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            text: self.text,
            created_at,
            attachments,
        }
    }
}

pub struct AttachmentRow {
    pub message_id: MessageId,
    pub file_id: i64,
    pub mime: String,
    pub original_name: String,
}

impl AttachmentRow {
    pub fn into_attachment(self) -> Attachment {
        Attachment {
            id: self.file_id,
            mime: self.mime,
            name: self.original_name,
            url: file_url(self.file_id),
        }
    }
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}
