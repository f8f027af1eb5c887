use thiserror::Error;

/// Why a request was rejected before anything was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidRequest {
    #[error("user is not a participant of the chat")]
    NotParticipant,

    #[error("message does not exist in the chat")]
    UnknownMessage,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] InvalidRequest),

    #[error("message has neither text nor attachments")]
    EmptyMessage,

    /// Persistence failed; nothing was pushed.
    #[error("chat store failure: {0}")]
    Store(#[from] anyhow::Error),
}
