use serde::{Deserialize, Serialize};

use crate::models::{ChatId, Message, MessageId, UserId};

/// Events pushed from the server to live connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Online state of `user_id` as seen through `chat_id`
    #[serde(rename = "presence:state")]
    PresenceState {
        chat_id: ChatId,
        user_id: UserId,
        online: bool,
    },

    #[serde(rename = "typing:start")]
    TypingStart { chat_id: ChatId, from_user_id: UserId },

    #[serde(rename = "typing:stop")]
    TypingStop { chat_id: ChatId, from_user_id: UserId },

    /// A message was persisted in a chat the recipient belongs to
    #[serde(rename = "message:new")]
    MessageNew { chat_id: ChatId, message: Message },

    /// The peer advanced their read watermark
    #[serde(rename = "message:read")]
    MessageRead {
        chat_id: ChatId,
        user_id: UserId,
        last_read_message_id: MessageId,
    },

    #[serde(rename = "pong")]
    Pong,
}

/// Control frames sent FROM client TO server over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Start watching a chat: presence and typing become visible
    #[serde(rename = "presence:subscribe")]
    PresenceSubscribe { chat_id: ChatId },

    #[serde(rename = "presence:unsubscribe")]
    PresenceUnsubscribe { chat_id: ChatId },

    #[serde(rename = "typing:start")]
    TypingStart { chat_id: ChatId },

    #[serde(rename = "typing:stop")]
    TypingStop { chat_id: ChatId },

    #[serde(rename = "ping")]
    Ping,

    /// Any `type` this server does not know about.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// Parse a text frame. `None` means the frame was not valid JSON or a
    /// known type carried malformed fields.
    pub fn decode(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_known_frames() {
        assert_eq!(
            ClientFrame::decode(r#"{"type":"presence:subscribe","chat_id":7}"#),
            Some(ClientFrame::PresenceSubscribe { chat_id: 7 })
        );
        assert_eq!(
            ClientFrame::decode(r#"{"type":"typing:stop","chat_id":3}"#),
            Some(ClientFrame::TypingStop { chat_id: 3 })
        );
        assert_eq!(ClientFrame::decode(r#"{"type":"ping"}"#), Some(ClientFrame::Ping));
    }

    #[test]
    fn unknown_type_is_explicit() {
        assert_eq!(
            ClientFrame::decode(r#"{"type":"voice:join","chat_id":1}"#),
            Some(ClientFrame::Unknown)
        );
    }

    #[test]
    fn malformed_frames_do_not_decode() {
        assert_eq!(ClientFrame::decode("not json"), None);
        assert_eq!(ClientFrame::decode(r#"{"type":"presence:subscribe"}"#), None);
        assert_eq!(
            ClientFrame::decode(r#"{"type":"typing:start","chat_id":"1"}"#),
            None
        );
        assert_eq!(ClientFrame::decode(r#"{"chat_id":1}"#), None);
    }

    #[test]
    fn server_events_are_flat_and_tagged() {
        let presence = ServerEvent::PresenceState {
            chat_id: 1,
            user_id: 2,
            online: false,
        };
        assert_eq!(
            serde_json::to_value(&presence).unwrap(),
            json!({"type": "presence:state", "chat_id": 1, "user_id": 2, "online": false})
        );

        let read = ServerEvent::MessageRead {
            chat_id: 1,
            user_id: 2,
            last_read_message_id: 9,
        };
        assert_eq!(
            serde_json::to_value(&read).unwrap(),
            json!({"type": "message:read", "chat_id": 1, "user_id": 2, "last_read_message_id": 9})
        );

        assert_eq!(
            serde_json::to_value(&ServerEvent::Pong).unwrap(),
            json!({"type": "pong"})
        );
    }
}
