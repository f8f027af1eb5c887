use serde::{Deserialize, Serialize};

use crate::models::{ChatId, Message, MessageId, ReadState, UserId, UserPublic};

// -- JWT Claims --

/// JWT claims shared by parley-api (issuing, REST middleware) and
/// parley-gateway (live-channel authentication). `sub` carries the user id
/// as a decimal string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
}

// -- Chats --

#[derive(Debug, Deserialize)]
pub struct StartChatRequest {
    pub other_user_id: UserId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartChatResponse {
    pub chat_id: ChatId,
    #[serde(rename = "with")]
    pub with_user: UserPublic,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: ChatId,
    pub other: UserPublic,
    pub other_online: bool,
    pub my_last_read: MessageId,
    pub other_last_read: MessageId,
    pub last_incoming_id: MessageId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub items: Vec<Message>,
    pub next_before_id: Option<MessageId>,
    pub read_state: ReadState,
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub file_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub last_read_message_id: MessageId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub ok: bool,
    pub last_read_message_id: MessageId,
}
