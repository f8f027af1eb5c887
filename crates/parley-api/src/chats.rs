use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};

use parley_gateway::{DeliveryError, InvalidRequest};
use parley_types::api::{
    ChatSummary, HistoryResponse, MarkReadRequest, MarkReadResponse, SendMessageRequest,
    StartChatRequest, StartChatResponse,
};
use parley_types::models::ReadState;
use parley_types::{ChatId, MessageId};

use crate::middleware::CurrentUser;
use crate::{AppState, with_db};

const MAX_LISTED_CHATS: u32 = 50;
const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before_id: Option<MessageId>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

fn delivery_status(err: DeliveryError) -> StatusCode {
    match err {
        DeliveryError::EmptyMessage => StatusCode::BAD_REQUEST,
        DeliveryError::InvalidRequest(InvalidRequest::NotParticipant) => StatusCode::NOT_FOUND,
        DeliveryError::InvalidRequest(InvalidRequest::UnknownMessage) => StatusCode::BAD_REQUEST,
        DeliveryError::Store(e) => {
            error!("store failure: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn start_dm(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<StartChatRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let other_id = req.other_user_id;
    if other_id == me {
        return Err(StatusCode::BAD_REQUEST);
    }

    let (chat, other) = with_db(&state, move |db| {
        let Some(other) = db.get_user_by_id(other_id)? else {
            return Ok(None);
        };
        let (chat, _created) = db.get_or_create_chat(me, other.id)?;
        Ok(Some((chat, other)))
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(StartChatResponse {
        chat_id: chat.id,
        with_user: other.public(),
    }))
}

pub async fn list_dm(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = with_db(&state, move |db| {
        let mut rows = Vec::new();
        for chat in db.list_chats_for_user(me, MAX_LISTED_CHATS)? {
            let Some(other_id) = chat.other(me) else { continue };
            let Some(other) = db.get_user_by_id(other_id)? else {
                warn!("chat {} references missing user {}", chat.id, other_id);
                continue;
            };
            rows.push((
                chat.id,
                other,
                db.get_read_state(chat.id, me)?,
                db.get_read_state(chat.id, other_id)?,
                db.last_incoming_id(chat.id, me)?,
            ));
        }
        Ok(rows)
    })
    .await?;

    let summaries: Vec<ChatSummary> = rows
        .into_iter()
        .map(|(chat_id, other, my_last_read, other_last_read, last_incoming_id)| ChatSummary {
            chat_id,
            other_online: state.dispatcher.is_online(other.id),
            other: other.public(),
            my_last_read,
            other_last_read,
            last_incoming_id,
        })
        .collect();

    Ok(Json(summaries))
}

pub async fn history(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let before_id = query.before_id;

    let response = with_db(&state, move |db| {
        let Some(other_id) = db.get_chat(chat_id)?.and_then(|c| c.other(me)) else {
            return Ok(None);
        };

        let items = db.get_history(chat_id, before_id, limit)?;
        let read_state = ReadState {
            my_last_read: db.get_read_state(chat_id, me)?,
            other_last_read: db.get_read_state(chat_id, other_id)?,
        };

        Ok(Some(HistoryResponse {
            next_before_id: items.first().map(|m| m.id),
            items,
            read_state,
        }))
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(response))
}

pub async fn send(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let message = state
        .dispatcher
        .messages()
        .send(chat_id, me, req.text, req.file_ids)
        .await
        .map_err(delivery_status)?;

    Ok(Json(message))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let watermark = state
        .dispatcher
        .receipts()
        .mark_read(chat_id, me, req.last_read_message_id)
        .await
        .map_err(delivery_status)?;

    Ok(Json(MarkReadResponse {
        ok: true,
        last_read_message_id: watermark,
    }))
}
