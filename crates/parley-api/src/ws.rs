use axum::{
    extract::{Query, State, WebSocketUpgrade, rejection::QueryRejection},
    http::{HeaderMap, header},
    response::Response,
};
use serde::Deserialize;

use parley_gateway::auth::bearer_token;
use parley_gateway::connection::{handle_connection, reject_connection};
use parley_gateway::{AuthFailure, AuthGate};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Upgrade first, authenticate second: a bad credential, or a query string
/// that does not parse, is answered with a policy-violation close frame
/// rather than an HTTP error.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<WsQuery>, QueryRejection>,
) -> Response {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
        .or_else(|| query.ok().and_then(|Query(q)| q.token));

    let resolved = match credential {
        Some(token) => state.auth.resolve(&token),
        None => Err(AuthFailure::Missing),
    };

    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| async move {
        match resolved {
            Ok(user_id) => handle_connection(socket, dispatcher, user_id).await,
            Err(reason) => reject_connection(socket, reason).await,
        }
    })
}
