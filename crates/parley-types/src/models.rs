use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity issued by the user store.
pub type UserId = i64;

/// A 1:1 conversation between two distinct users.
pub type ChatId = i64;

/// Assigned at persistence time; strictly increasing.
pub type MessageId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// Public view of a user, as embedded in chat listings and search results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPublic {
    pub id: UserId,
    pub username: String,
    pub avatar_file_id: Option<i64>,
    pub avatar_url: Option<String>,
}

impl UserPublic {
    pub fn new(id: UserId, username: String, avatar_file_id: Option<i64>) -> Self {
        Self {
            id,
            username,
            avatar_file_id,
            avatar_url: avatar_file_id.map(file_url),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: i64,
    pub mime: String,
    pub name: String,
    pub url: String,
}

/// A persisted direct message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
}

/// Both read watermarks of a chat, seen from one participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadState {
    pub my_last_read: MessageId,
    pub other_last_read: MessageId,
}

/// Blob bodies live outside this service; only the download path is known here.
pub fn file_url(file_id: i64) -> String {
    format!("/files/{}", file_id)
}
