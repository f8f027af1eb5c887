pub mod auth;
pub mod chats;
pub mod middleware;
pub mod users;
pub mod ws;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::error;

use parley_db::Database;
use parley_gateway::{Dispatcher, JwtAuth};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub auth: JwtAuth,
    pub dispatcher: Dispatcher,
}

/// All HTTP routes plus the live channel at `/ws`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/ws", get(ws::ws_upgrade))
        .route("/ping", get(ping))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/users/search", get(users::search))
        .route("/chats/dm/start", post(chats::start_dm))
        .route("/chats/dm/list", get(chats::list_dm))
        .route("/chats/dm/{chat_id}/messages", get(chats::history))
        .route("/chats/dm/{chat_id}/send", post(chats::send))
        .route("/chats/dm/{chat_id}/read", post(chats::mark_read))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

async fn ping() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("database error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
