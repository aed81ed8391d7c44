use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::{delete, get, put},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{
        CreateNamedRequest, PermissionCreatedResponse, PermissionsResponse, RoleCreatedResponse,
        RoleSyncResponse, RolesResponse, RolesWithPermissionsResponse, SyncPermissionsRequest,
        SyncRolesRequest, UserSyncResponse,
    },
    services,
};
use crate::{auth::extractors::AuthUser, error::AppResult, state::AppState};

pub fn role_routes() -> Router<AppState> {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/permissions", get(list_roles_with_permissions))
        .route("/roles/:role", delete(delete_role))
        .route("/roles/:role/permissions", put(sync_role_permissions))
}

pub fn permission_routes() -> Router<AppState> {
    Router::new()
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/permissions/:id", delete(delete_permission))
}

pub fn assignment_routes() -> Router<AppState> {
    Router::new().route("/users/:id/roles", put(sync_user_roles))
}

#[instrument(skip(state))]
pub async fn list_roles(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<RolesResponse>> {
    let roles = services::list_roles(&state, auth.user_id).await?;
    Ok(Json(RolesResponse { roles }))
}

#[instrument(skip(state))]
pub async fn list_roles_with_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<RolesWithPermissionsResponse>> {
    let roles = services::list_roles_with_permissions(&state, auth.user_id).await?;
    Ok(Json(RolesWithPermissionsResponse { roles }))
}

#[instrument(skip(state, payload))]
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: Result<Json<CreateNamedRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<RoleCreatedResponse>)> {
    let Json(payload) = payload?;
    let role = services::create_role(&state, auth.user_id, payload.validate()?).await?;
    Ok((
        StatusCode::CREATED,
        Json(RoleCreatedResponse {
            message: "Role created",
            role,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<StatusCode> {
    let Path(role_id) = path?;
    services::delete_role(&state, auth.user_id, role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn sync_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role): Path<String>,
    payload: Result<Json<SyncPermissionsRequest>, JsonRejection>,
) -> AppResult<Json<RoleSyncResponse>> {
    let Json(payload) = payload?;
    let requested = payload.validate()?;
    let outcome = services::sync_role_permissions(&state, auth.user_id, &role, requested).await?;
    Ok(Json(RoleSyncResponse { role, outcome }))
}

#[instrument(skip(state))]
pub async fn list_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<PermissionsResponse>> {
    let permissions = services::list_permissions(&state, auth.user_id).await?;
    Ok(Json(PermissionsResponse { permissions }))
}

#[instrument(skip(state, payload))]
pub async fn create_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: Result<Json<CreateNamedRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<PermissionCreatedResponse>)> {
    let Json(payload) = payload?;
    let permission =
        services::create_permission(&state, auth.user_id, payload.validate()?).await?;
    Ok((
        StatusCode::CREATED,
        Json(PermissionCreatedResponse {
            message: "Permission created",
            permission,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn delete_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<StatusCode> {
    let Path(permission_id) = path?;
    services::delete_permission(&state, auth.user_id, permission_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn sync_user_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<SyncRolesRequest>, JsonRejection>,
) -> AppResult<Json<UserSyncResponse>> {
    let Path(user_id) = path?;
    let Json(payload) = payload?;
    let requested = payload.validate()?;
    let outcome = services::sync_user_roles(&state, auth.user_id, user_id, requested).await?;
    Ok(Json(UserSyncResponse { user_id, outcome }))
}
