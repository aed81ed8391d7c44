use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection},
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    dto::{
        CreateUserRequest, PictureUpload, UpdateUserRequest, UserResource, UserResponse,
        UsersResponse, MAX_PICTURE_BYTES,
    },
    services,
};
use crate::{
    auth::extractors::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(show_user).put(update_user).delete(delete_user),
        )
}

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/user/profile", put(update_profile))
        // headroom over the picture cap so oversize files get a validation error
        .layer(DefaultBodyLimit::max(MAX_PICTURE_BYTES * 2))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<UsersResponse>> {
    let users = services::list_users(&state, auth.user_id).await?;
    Ok(Json(UsersResponse { users }))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let Json(payload) = payload?;
    let user = services::create_user(&state, auth.user_id, payload.validate()?).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            message: "User created",
            user,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn show_user(
    State(state): State<AppState>,
    auth: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<UserResource>> {
    let Path(id) = path?;
    Ok(Json(services::show_user(&state, auth.user_id, id).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> AppResult<Json<UserResponse>> {
    let Path(id) = path?;
    let Json(payload) = payload?;
    let user = services::update_user(&state, auth.user_id, id, payload.validate()?).await?;
    Ok(Json(UserResponse {
        message: "User updated",
        user,
    }))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<StatusCode> {
    let Path(id) = path?;
    services::delete_user(&state, auth.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /user/profile (multipart)
/// Text fields mirror `PUT /users/:id`; the file goes in `profile_picture`.
#[instrument(skip(state, mp))]
pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<UserResponse>> {
    let mut mp = mp?;
    let mut req = UpdateUserRequest::default();
    let mut picture = None;

    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "profile_picture" {
            let content_type = field.content_type().map(|s| s.to_string());
            let data = field.bytes().await.map_err(bad_multipart)?;
            picture = Some(PictureUpload::new(data, content_type.as_deref())?);
            continue;
        }

        let value = field.text().await.map_err(bad_multipart)?;
        let slot = match name.as_str() {
            "first_name" => &mut req.first_name,
            "last_name" => &mut req.last_name,
            "email" => &mut req.email,
            "birth_date" => &mut req.birth_date,
            "gender" => &mut req.gender,
            "new_password" | "password" => &mut req.new_password,
            "current_password" => &mut req.current_password,
            _ => continue,
        };
        *slot = Some(value);
    }

    let user = services::update_self(&state, auth.user_id, req.validate()?, picture).await?;
    Ok(Json(UserResponse {
        message: "Profile updated",
        user,
    }))
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> AppError {
    warn!(error = %e, "malformed multipart body");
    AppError::validation(format!("Malformed multipart body: {e}"))
}
