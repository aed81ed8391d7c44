use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::{error::AppError, state::AppState};

/// Authenticated caller: a verified, unrevoked token belonging to an active user.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub token_id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::unauthenticated("Missing Authorization header"))?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| AppError::unauthenticated("Invalid Authorization header"))?;

        let claims = JwtKeys::from_ref(state).verify(token).map_err(|_| {
            warn!("invalid or expired token");
            AppError::unauthenticated("Invalid or expired token")
        })?;

        let mut tx = state.store.begin().await?;
        let record = tx.find_token(claims.jti).await?;
        let user = tx.find_active_user(claims.sub).await?;
        tx.commit().await?;

        match (record, user) {
            (Some(record), Some(_)) if record.user_id == claims.sub => Ok(AuthUser {
                user_id: claims.sub,
                token_id: claims.jti,
            }),
            _ => {
                warn!(user_id = %claims.sub, token_id = %claims.jti, "revoked token or inactive user");
                Err(AppError::unauthenticated("Invalid or expired token"))
            }
        }
    }
}
