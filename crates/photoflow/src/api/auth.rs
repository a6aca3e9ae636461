use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};

use crate::api::AppState;
use crate::assets::is_valid_owner_id;
use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated end user. Identity comes from the upstream identity
/// provider as `x-user-id`; when a service token is configured the request
/// must also carry it as a bearer token.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        if let Some(expected) = state.api_token.as_deref() {
            let presented = parts
                .headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or_else(|| AppError::auth("missing bearer token"))?;
            if !tokens_match(presented.trim(), expected) {
                return Err(AppError::auth("invalid bearer token"));
            }
        }

        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::auth("missing x-user-id"))?;
        if !is_valid_owner_id(user_id) {
            return Err(AppError::auth("invalid x-user-id"));
        }

        Ok(Caller {
            user_id: user_id.to_string(),
        })
    }
}

/// Compare fixed-length digests so the comparison time does not depend on
/// where the tokens first differ.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
