use anyhow::Context;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{
    CreateUserInput, PictureUpload, ProfileFields, UpdateInput, UserResource,
};
use crate::{
    auth::password::{hash_password, verify_password},
    error::{AppError, AppResult},
    rbac::{
        authz,
        permissions::{USER_CREATE, USER_DELETE, USER_UPDATE, USER_VIEW},
        services::ensure_role,
    },
    state::AppState,
    store::{StoreTx, User},
};

/// Inserts a new account, or revives a soft-deleted one that owns the same
/// email. Returns the row and whether it was revived.
pub(crate) async fn create_or_restore(
    tx: &mut dyn StoreTx,
    profile: ProfileFields,
    password_hash: String,
) -> AppResult<(User, bool)> {
    let now = OffsetDateTime::now_utc();
    match tx.find_user_by_email(&profile.email).await? {
        Some(user) if user.is_active() => Err(AppError::duplicate(format!(
            "Email '{}' is already registered",
            user.email
        ))),
        Some(mut user) => {
            profile.revive(&mut user, password_hash, now);
            if !tx.update_user(&user).await? {
                return Err(AppError::duplicate("Email is already registered"));
            }
            info!(user_id = %user.id, "soft-deleted account restored");
            Ok((user, true))
        }
        None => {
            let user = profile.into_new_user(password_hash).into_user(now);
            if !tx.insert_user(&user).await? {
                return Err(AppError::duplicate(format!(
                    "Email '{}' is already registered",
                    user.email
                )));
            }
            Ok((user, false))
        }
    }
}

/// Client projection of a user, with a presigned picture URL when one is stored.
pub async fn user_resource(state: &AppState, user: &User) -> AppResult<UserResource> {
    let url = match &user.profile_picture {
        Some(key) => Some(
            state
                .storage
                .presign_get(key, state.config.storage.url_ttl_secs)
                .await
                .with_context(|| format!("presign profile picture {key}"))?,
        ),
        None => None,
    };
    Ok(UserResource::new(user, url))
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        _ => None,
    }
}

fn picture_key(user_id: Uuid, upload: &PictureUpload) -> String {
    let ext = ext_from_mime(&upload.content_type).unwrap_or("bin");
    format!("profile-pictures/{}/{}.{}", user_id, Uuid::new_v4(), ext)
}

/// Applies a password change. Changing your own password needs the current one.
fn apply_password(
    user: &mut User,
    self_service: bool,
    new_password: Option<String>,
    current_password: Option<String>,
) -> AppResult<()> {
    let Some(new_password) = new_password else {
        return Ok(());
    };
    if self_service {
        let current = current_password
            .ok_or_else(|| AppError::validation("current_password is required"))?;
        if !verify_password(&current, &user.password_hash)? {
            warn!(user_id = %user.id, "wrong current password");
            return Err(AppError::WrongPassword);
        }
    }
    user.password_hash = hash_password(&new_password)?;
    Ok(())
}

async fn save(tx: &mut dyn StoreTx, user: &mut User) -> AppResult<()> {
    user.updated_at = OffsetDateTime::now_utc();
    if !tx.update_user(user).await? {
        return Err(AppError::duplicate(format!(
            "Email '{}' is already taken",
            user.email
        )));
    }
    Ok(())
}

#[instrument(skip(state))]
pub async fn list_users(state: &AppState, actor: Uuid) -> AppResult<Vec<UserResource>> {
    let mut tx = state.store.begin().await?;
    authz::require_permission(tx.as_mut(), actor, USER_VIEW).await?;
    let users = tx.list_active_users().await?;
    tx.commit().await?;

    let mut out = Vec::with_capacity(users.len());
    for user in &users {
        out.push(user_resource(state, user).await?);
    }
    Ok(out)
}

#[instrument(skip(state, input))]
pub async fn create_user(
    state: &AppState,
    actor: Uuid,
    input: CreateUserInput,
) -> AppResult<UserResource> {
    let mut tx = state.store.begin().await?;
    authz::require_permission(tx.as_mut(), actor, USER_CREATE).await?;

    let hash = hash_password(&input.password)?;
    let (user, restored) = create_or_restore(tx.as_mut(), input.profile, hash).await?;
    ensure_role(tx.as_mut(), user.id, input.role).await?;
    tx.commit().await?;

    info!(%actor, user_id = %user.id, role = input.role, restored, "user created");
    user_resource(state, &user).await
}

#[instrument(skip(state))]
pub async fn show_user(state: &AppState, actor: Uuid, target: Uuid) -> AppResult<UserResource> {
    let mut tx = state.store.begin().await?;
    authz::require_permission_or_self(tx.as_mut(), actor, USER_VIEW, target).await?;
    let user = tx
        .find_active_user(target)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    tx.commit().await?;
    user_resource(state, &user).await
}

#[instrument(skip(state, input))]
pub async fn update_user(
    state: &AppState,
    actor: Uuid,
    target: Uuid,
    input: UpdateInput,
) -> AppResult<UserResource> {
    let mut tx = state.store.begin().await?;
    authz::require_permission_or_self(tx.as_mut(), actor, USER_UPDATE, target).await?;
    authz::require_covers(tx.as_mut(), actor, target).await?;

    tx.lock_user(target).await?;
    let mut user = tx
        .find_active_user(target)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    apply_password(
        &mut user,
        actor == target,
        input.new_password,
        input.current_password,
    )?;
    input.patch.apply(&mut user);
    save(tx.as_mut(), &mut user).await?;
    tx.commit().await?;

    info!(%actor, user_id = %target, "user updated");
    user_resource(state, &user).await
}

/// Soft delete. The row and its role assignments stay; every active-user
/// query stops seeing them.
#[instrument(skip(state))]
pub async fn delete_user(state: &AppState, actor: Uuid, target: Uuid) -> AppResult<()> {
    let mut tx = state.store.begin().await?;
    authz::require_permission(tx.as_mut(), actor, USER_DELETE).await?;

    if actor == target {
        warn!(%actor, "refused to delete own account");
        return Err(AppError::self_modification("You cannot delete your own account"));
    }
    authz::require_covers(tx.as_mut(), actor, target).await?;

    tx.lock_user(target).await?;
    let mut user = tx
        .find_active_user(target)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    user.deleted_at = Some(OffsetDateTime::now_utc());
    save(tx.as_mut(), &mut user).await?;
    tx.commit().await?;

    info!(%actor, user_id = %target, "user soft-deleted");
    Ok(())
}

/// Self-service profile update, optionally replacing the profile picture.
#[instrument(skip(state, input, picture))]
pub async fn update_self(
    state: &AppState,
    user_id: Uuid,
    input: UpdateInput,
    picture: Option<PictureUpload>,
) -> AppResult<UserResource> {
    let new_key = match &picture {
        Some(upload) => {
            let key = picture_key(user_id, upload);
            state
                .storage
                .put_object(&key, upload.body.clone(), &upload.content_type)
                .await
                .with_context(|| format!("put_object {key}"))?;
            Some(key)
        }
        None => None,
    };

    let result = apply_self_update(state, user_id, input, new_key.clone()).await;
    let (user, old_key) = match result {
        Ok(done) => done,
        Err(e) => {
            if let Some(key) = &new_key {
                discard_blob(state, key).await;
            }
            return Err(e);
        }
    };

    if let Some(old) = old_key {
        discard_blob(state, &old).await;
    }

    info!(%user_id, picture = new_key.is_some(), "profile updated");
    user_resource(state, &user).await
}

async fn apply_self_update(
    state: &AppState,
    user_id: Uuid,
    input: UpdateInput,
    new_key: Option<String>,
) -> AppResult<(User, Option<String>)> {
    let mut tx = state.store.begin().await?;
    tx.lock_user(user_id).await?;
    let mut user = tx
        .find_active_user(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    apply_password(&mut user, true, input.new_password, input.current_password)?;
    input.patch.apply(&mut user);
    let old_key = match new_key {
        Some(key) => user.profile_picture.replace(key),
        None => None,
    };
    save(tx.as_mut(), &mut user).await?;
    tx.commit().await?;
    Ok((user, old_key))
}

async fn discard_blob(state: &AppState, key: &str) {
    if let Err(e) = state.storage.delete_object(key).await {
        warn!(error = %e, key, "failed to delete profile picture");
    }
}
