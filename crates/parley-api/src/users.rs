use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use parley_types::models::UserPublic;

use crate::middleware::CurrentUser;
use crate::{AppState, with_db};

const MAX_RESULTS: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// Substring match on usernames. A blank query returns nothing.
pub async fn search(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let needle = query.q.trim().to_string();
    if needle.is_empty() {
        return Ok(Json(Vec::<UserPublic>::new()));
    }

    let users = with_db(&state, move |db| db.search_users(&needle, me, MAX_RESULTS)).await?;

    Ok(Json(users.iter().map(|u| u.public()).collect()))
}
