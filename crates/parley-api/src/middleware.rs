use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};

use parley_gateway::AuthGate;
use parley_gateway::auth::bearer_token;
use parley_types::UserId;

use crate::{AppState, with_db};

/// The authenticated caller, inserted by [`require_auth`].
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

/// Extract and validate the JWT from the Authorization header, and make sure
/// the user it names still exists.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let user_id = state.auth.resolve(token).map_err(|_| StatusCode::UNAUTHORIZED)?;

    with_db(&state, move |db| db.get_user_by_id(user_id))
        .await?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(CurrentUser(user_id));
    Ok(next.run(req).await)
}
