//! Role and permission administration. Each operation opens one transaction,
//! runs its gates first, and commits only after every check passed.

use std::collections::BTreeSet;

use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    authz,
    dto::{NamedInput, RoleWithPermissions},
    permissions::{
        PERMISSION_ASSIGN_ROLE, PERMISSION_CREATE, PERMISSION_DELETE, PERMISSION_VIEW,
        ROLE_ASSIGN_USER, ROLE_CREATE, ROLE_DELETE, ROLE_VIEW,
    },
    sync::{diff, SyncOutcome},
};
use crate::{
    error::{AppError, AppResult},
    state::AppState,
    store::{Permission, Role, StoreTx, DEFAULT_GUARD},
};

fn unknown_names(
    kind: &str,
    requested: &BTreeSet<String>,
    found: &BTreeSet<String>,
) -> AppResult<()> {
    let missing: Vec<&str> = requested.difference(found).map(String::as_str).collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(AppError::validation(format!(
        "Unknown {kind}: {}",
        missing.join(", ")
    )))
}

/// Gives `user_id` the named role unless they already hold it.
pub(crate) async fn ensure_role(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
    role_name: &str,
) -> AppResult<()> {
    let role = tx
        .find_role_by_name(role_name, DEFAULT_GUARD)
        .await?
        .ok_or_else(|| anyhow::anyhow!("role '{role_name}' is missing; was the seed applied?"))?;
    let held = tx.user_roles(user_id).await?;
    if !held.iter().any(|r| r.id == role.id) {
        tx.assign_roles(user_id, &[role.id]).await?;
    }
    Ok(())
}

#[instrument(skip(state))]
pub async fn list_roles(state: &AppState, actor: Uuid) -> AppResult<Vec<Role>> {
    let mut tx = state.store.begin().await?;
    authz::require_permission(tx.as_mut(), actor, ROLE_VIEW).await?;
    let roles = tx.list_roles().await?;
    tx.commit().await?;
    Ok(roles)
}

#[instrument(skip(state))]
pub async fn list_permissions(state: &AppState, actor: Uuid) -> AppResult<Vec<Permission>> {
    let mut tx = state.store.begin().await?;
    authz::require_permission(tx.as_mut(), actor, PERMISSION_VIEW).await?;
    let permissions = tx.list_permissions().await?;
    tx.commit().await?;
    Ok(permissions)
}

#[instrument(skip(state))]
pub async fn list_roles_with_permissions(
    state: &AppState,
    actor: Uuid,
) -> AppResult<Vec<RoleWithPermissions>> {
    let mut tx = state.store.begin().await?;
    authz::require_permission(tx.as_mut(), actor, ROLE_VIEW).await?;
    let roles = tx.list_roles().await?;
    let mut out = Vec::with_capacity(roles.len());
    for role in roles {
        let permissions = tx
            .role_permissions(role.id)
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect();
        out.push(RoleWithPermissions {
            role: role.name,
            permissions,
        });
    }
    tx.commit().await?;
    Ok(out)
}

#[instrument(skip(state))]
pub async fn create_role(state: &AppState, actor: Uuid, input: NamedInput) -> AppResult<Role> {
    let mut tx = state.store.begin().await?;
    authz::require_permission(tx.as_mut(), actor, ROLE_CREATE).await?;

    let role = Role {
        id: Uuid::new_v4(),
        name: input.name,
        guard_name: input.guard_name,
        created_at: OffsetDateTime::now_utc(),
    };
    if !tx.insert_role(&role).await? {
        return Err(AppError::duplicate(format!(
            "Role '{}' already exists for guard '{}'",
            role.name, role.guard_name
        )));
    }
    tx.commit().await?;

    info!(%actor, role = %role.name, guard = %role.guard_name, "role created");
    Ok(role)
}

#[instrument(skip(state))]
pub async fn create_permission(
    state: &AppState,
    actor: Uuid,
    input: NamedInput,
) -> AppResult<Permission> {
    let mut tx = state.store.begin().await?;
    authz::require_permission(tx.as_mut(), actor, PERMISSION_CREATE).await?;

    let permission = Permission {
        id: Uuid::new_v4(),
        name: input.name,
        guard_name: input.guard_name,
        created_at: OffsetDateTime::now_utc(),
    };
    if !tx.insert_permission(&permission).await? {
        return Err(AppError::duplicate(format!(
            "Permission '{}' already exists for guard '{}'",
            permission.name, permission.guard_name
        )));
    }
    tx.commit().await?;

    info!(%actor, permission = %permission.name, guard = %permission.guard_name, "permission created");
    Ok(permission)
}

/// Makes the role's permission set exactly `requested`. Refused when the
/// actor holds the role themselves.
#[instrument(skip(state))]
pub async fn sync_role_permissions(
    state: &AppState,
    actor: Uuid,
    role_name: &str,
    requested: BTreeSet<String>,
) -> AppResult<SyncOutcome> {
    let mut tx = state.store.begin().await?;
    authz::require_permission(tx.as_mut(), actor, PERMISSION_ASSIGN_ROLE).await?;

    let role = tx
        .find_role_by_name(role_name, DEFAULT_GUARD)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Role '{role_name}' not found")))?;
    tx.lock_role(role.id).await?;

    if tx.user_roles(actor).await?.iter().any(|r| r.id == role.id) {
        warn!(%actor, role = %role.name, "refused to edit permissions of a held role");
        return Err(AppError::self_modification(
            "You cannot change the permissions of a role you hold",
        ));
    }

    let names: Vec<String> = requested.iter().cloned().collect();
    let wanted = tx
        .find_permissions_by_names(&names, &role.guard_name)
        .await?;
    let found: BTreeSet<String> = wanted.iter().map(|p| p.name.clone()).collect();
    unknown_names("permissions", &requested, &found)?;

    let held = tx.role_permissions(role.id).await?;
    let current: BTreeSet<String> = held.iter().map(|p| p.name.clone()).collect();
    let delta = diff(&current, &requested);
    if delta.is_noop() {
        debug!(role = %role.name, "role permissions already in sync");
    }

    if !delta.to_add.is_empty() {
        let ids: Vec<Uuid> = wanted
            .iter()
            .filter(|p| delta.to_add.contains(&p.name))
            .map(|p| p.id)
            .collect();
        tx.grant_permissions(role.id, &ids).await?;
    }
    if !delta.to_remove.is_empty() {
        let ids: Vec<Uuid> = held
            .iter()
            .filter(|p| delta.to_remove.contains(&p.name))
            .map(|p| p.id)
            .collect();
        tx.revoke_permissions(role.id, &ids).await?;
    }
    tx.commit().await?;

    info!(
        %actor,
        role = %role.name,
        added = ?delta.to_add,
        removed = ?delta.to_remove,
        "role permissions synced"
    );
    Ok(SyncOutcome {
        added: delta.to_add,
        removed: delta.to_remove,
        current: requested,
    })
}

/// Makes the target's role set exactly `requested`. Nobody can edit their
/// own roles.
#[instrument(skip(state))]
pub async fn sync_user_roles(
    state: &AppState,
    actor: Uuid,
    target: Uuid,
    requested: BTreeSet<String>,
) -> AppResult<SyncOutcome> {
    let mut tx = state.store.begin().await?;
    authz::require_permission(tx.as_mut(), actor, ROLE_ASSIGN_USER).await?;

    if target == actor {
        warn!(%actor, "refused to edit own roles");
        return Err(AppError::self_modification("You cannot change your own roles"));
    }

    tx.lock_user(target).await?;
    tx.find_active_user(target)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    let names: Vec<String> = requested.iter().cloned().collect();
    let wanted = tx.find_roles_by_names(&names, DEFAULT_GUARD).await?;
    let found: BTreeSet<String> = wanted.iter().map(|r| r.name.clone()).collect();
    unknown_names("roles", &requested, &found)?;

    let held: Vec<Role> = tx
        .user_roles(target)
        .await?
        .into_iter()
        .filter(|r| r.guard_name == DEFAULT_GUARD)
        .collect();
    let current: BTreeSet<String> = held.iter().map(|r| r.name.clone()).collect();
    let delta = diff(&current, &requested);
    if delta.is_noop() {
        debug!(user_id = %target, "user roles already in sync");
    }

    if !delta.to_add.is_empty() {
        let ids: Vec<Uuid> = wanted
            .iter()
            .filter(|r| delta.to_add.contains(&r.name))
            .map(|r| r.id)
            .collect();
        tx.assign_roles(target, &ids).await?;
    }
    if !delta.to_remove.is_empty() {
        let ids: Vec<Uuid> = held
            .iter()
            .filter(|r| delta.to_remove.contains(&r.name))
            .map(|r| r.id)
            .collect();
        tx.unassign_roles(target, &ids).await?;
    }
    tx.commit().await?;

    info!(
        %actor,
        user_id = %target,
        added = ?delta.to_add,
        removed = ?delta.to_remove,
        "user roles synced"
    );
    Ok(SyncOutcome {
        added: delta.to_add,
        removed: delta.to_remove,
        current: requested,
    })
}

#[instrument(skip(state))]
pub async fn delete_role(state: &AppState, actor: Uuid, role_id: Uuid) -> AppResult<()> {
    let mut tx = state.store.begin().await?;
    authz::require_permission(tx.as_mut(), actor, ROLE_DELETE).await?;

    tx.lock_role(role_id).await?;
    let role = tx
        .find_role(role_id)
        .await?
        .ok_or_else(|| AppError::not_found("Role not found"))?;

    if tx.user_roles(actor).await?.iter().any(|r| r.id == role.id) {
        warn!(%actor, role = %role.name, "refused to delete a held role");
        return Err(AppError::self_modification("You cannot delete a role you hold"));
    }

    let holders = tx.count_active_role_holders(role.id).await?;
    if holders > 0 {
        warn!(%actor, role = %role.name, holders, "role still in use");
        return Err(AppError::conflict(
            format!("Role '{}' is still assigned to {holders} user(s)", role.name),
            holders,
        ));
    }

    tx.delete_role(role.id).await?;
    tx.commit().await?;

    info!(%actor, role = %role.name, "role deleted");
    Ok(())
}

#[instrument(skip(state))]
pub async fn delete_permission(
    state: &AppState,
    actor: Uuid,
    permission_id: Uuid,
) -> AppResult<()> {
    let mut tx = state.store.begin().await?;
    authz::require_permission(tx.as_mut(), actor, PERMISSION_DELETE).await?;

    tx.lock_permission(permission_id).await?;
    let permission = tx
        .find_permission(permission_id)
        .await?
        .ok_or_else(|| AppError::not_found("Permission not found"))?;

    for role in tx.user_roles(actor).await? {
        let granted = tx.role_permissions(role.id).await?;
        if granted.iter().any(|p| p.id == permission.id) {
            warn!(%actor, permission = %permission.name, "refused to delete a held permission");
            return Err(AppError::self_modification(
                "You cannot delete a permission granted to one of your roles",
            ));
        }
    }

    let roles = tx.count_permission_roles(permission.id).await?;
    if roles > 0 {
        warn!(%actor, permission = %permission.name, roles, "permission still in use");
        return Err(AppError::conflict(
            format!(
                "Permission '{}' is still granted to {roles} role(s)",
                permission.name
            ),
            roles,
        ));
    }

    tx.delete_permission(permission.id).await?;
    tx.commit().await?;

    info!(%actor, permission = %permission.name, "permission deleted");
    Ok(())
}
