use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use parley_types::UserId;
use parley_types::api::Claims;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("missing credential")]
    Missing,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("token subject is not a user id")]
    BadSubject,
}

/// Resolves a bearer credential to a user identity.
pub trait AuthGate: Send + Sync + 'static {
    fn resolve(&self, credential: &str) -> Result<UserId, AuthFailure>;
}

/// HS256 JWTs whose `sub` is the decimal user id.
#[derive(Clone)]
pub struct JwtAuth {
    secret: Arc<str>,
    ttl_minutes: i64,
}

impl JwtAuth {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            secret: Arc::from(secret),
            ttl_minutes,
        }
    }

    pub fn issue(&self, user_id: UserId) -> anyhow::Result<String> {
        let expires_at = chrono::TimeDelta::try_minutes(self.ttl_minutes)
            .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| anyhow::anyhow!("token lifetime of {} minutes is out of range", self.ttl_minutes))?;
        let claims = Claims {
            sub: user_id.to_string(),
            exp: expires_at.timestamp().max(0) as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        Ok(token)
    }
}

impl AuthGate for JwtAuth {
    fn resolve(&self, credential: &str) -> Result<UserId, AuthFailure> {
        if credential.is_empty() {
            return Err(AuthFailure::Missing);
        }

        let token_data = decode::<Claims>(
            credential,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AuthFailure::InvalidToken)?;

        token_data
            .claims
            .sub
            .parse::<UserId>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(AuthFailure::BadSubject)
    }
}

/// Extract the token from an `Authorization` header value. The scheme is
/// matched case-insensitively.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
