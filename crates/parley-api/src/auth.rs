use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{error, info};

use parley_types::api::{AuthRequest, LoginResponse, RegisterResponse};
use parley_types::models::User;

use crate::middleware::CurrentUser;
use crate::{AppState, with_db};

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<AuthRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let username = req.username.trim().to_string();
    let password = req.password.trim().to_string();

    if username.is_empty() || password.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let lookup = username.clone();
    if with_db(&state, move |db| db.get_user_by_username(&lookup))
        .await?
        .is_some()
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Hash password with Argon2id
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("password hashing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let name = username.clone();
    // A concurrent registration may have taken the name since the check above
    let user_id = with_db(&state, move |db| db.create_user(&name, &password_hash))
        .await?
        .ok_or(StatusCode::BAD_REQUEST)?;
    info!("registered user {} ({})", user_id, username);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: user_id,
            username,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<AuthRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let username = req.username.trim().to_string();
    let password = req.password.trim().to_string();

    let user = with_db(&state, move |db| db.get_user_by_username(&username))
        .await?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let hash = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    if !verified {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let access_token = state.auth.issue(user.id).map_err(|e| {
        error!("failed to sign token for user {}: {}", user.id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(LoginResponse { access_token }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = with_db(&state, move |db| db.get_user_by_id(user_id))
        .await?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(Json(User {
        id: user.id,
        username: user.username,
    }))
}

fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// A stored hash that fails to parse counts as a mismatch.
fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
