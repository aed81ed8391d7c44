use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{LoginRequest, LoginResponse, MeResponse, MessageResponse, PublicUser, RegisterRequest,
        RegisterResponse},
    extractors::AuthUser,
    services,
};
use crate::{error::AppResult, state::AppState, users::services::user_resource};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let Json(payload) = payload?;
    let user = services::register(&state, payload.validate()?).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully",
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<LoginResponse>> {
    let Json(payload) = payload?;
    let session = services::authenticate(&state, payload.validate()?).await?;
    Ok(Json(LoginResponse {
        token: session.token,
        token_type: "Bearer",
        user: PublicUser::from(&session.user),
        roles: session.roles,
        permissions: session.permissions,
    }))
}

#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<MessageResponse>> {
    services::logout(&state, auth.user_id, auth.token_id).await?;
    Ok(Json(MessageResponse {
        message: "Logged out successfully",
    }))
}

#[instrument(skip(state))]
pub async fn get_me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<MeResponse>> {
    let (user, roles, permissions) = services::current_user(&state, auth.user_id).await?;
    Ok(Json(MeResponse {
        user: user_resource(&state, &user).await?,
        roles,
        permissions,
    }))
}
