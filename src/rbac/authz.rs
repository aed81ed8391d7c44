//! Authorization queries. Nothing is cached: every answer is read from the
//! caller's transaction, so it reflects the latest committed assignments.

use std::collections::BTreeSet;

use tracing::warn;
use uuid::Uuid;

use super::permissions::SUPER_ADMIN;
use crate::{
    error::{AppError, AppResult},
    store::StoreTx,
};

/// Names of the roles held by an active user. Soft-deleted users hold nothing.
pub async fn role_names(tx: &mut dyn StoreTx, user_id: Uuid) -> anyhow::Result<BTreeSet<String>> {
    if tx.find_active_user(user_id).await?.is_none() {
        return Ok(BTreeSet::new());
    }
    let roles = tx.user_roles(user_id).await?;
    Ok(roles.into_iter().map(|r| r.name).collect())
}

/// Union of the permissions of every role the user holds.
pub async fn effective_permissions(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
) -> anyhow::Result<BTreeSet<String>> {
    if tx.find_active_user(user_id).await?.is_none() {
        return Ok(BTreeSet::new());
    }
    let names = tx.user_permission_names(user_id).await?;
    Ok(names.into_iter().collect())
}

pub async fn has_role(tx: &mut dyn StoreTx, user_id: Uuid, role: &str) -> anyhow::Result<bool> {
    Ok(role_names(tx, user_id).await?.contains(role))
}

pub async fn has_permission(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
    permission: &str,
) -> anyhow::Result<bool> {
    Ok(effective_permissions(tx, user_id).await?.contains(permission))
}

/// Gate: passes when the user holds `permission` through a role, or is a super-admin.
pub async fn require_permission(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
    permission: &str,
) -> AppResult<()> {
    if has_permission(tx, user_id, permission).await? || has_role(tx, user_id, SUPER_ADMIN).await? {
        return Ok(());
    }
    warn!(%user_id, permission, "authorization denied");
    Err(AppError::AuthorizationDenied(permission.to_string()))
}

/// Gate for endpoints a user may always call on their own record.
pub async fn require_permission_or_self(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
    permission: &str,
    target: Uuid,
) -> AppResult<()> {
    if user_id == target {
        return Ok(());
    }
    require_permission(tx, user_id, permission).await
}

/// Gate for acting on another account's credentials or existence: the actor
/// must hold every permission the target holds, and only a super-admin may
/// touch a super-admin.
pub async fn require_covers(tx: &mut dyn StoreTx, actor: Uuid, target: Uuid) -> AppResult<()> {
    if actor == target || has_role(tx, actor, SUPER_ADMIN).await? {
        return Ok(());
    }
    if has_role(tx, target, SUPER_ADMIN).await? {
        warn!(%actor, %target, "refused to manage a super-admin");
        return Err(AppError::AuthorizationDenied(SUPER_ADMIN.to_string()));
    }

    let held = effective_permissions(tx, actor).await?;
    let target_perms = effective_permissions(tx, target).await?;
    if let Some(missing) = target_perms.difference(&held).next() {
        warn!(%actor, %target, permission = %missing, "target outranks actor");
        return Err(AppError::AuthorizationDenied(missing.clone()));
    }
    Ok(())
}
