//! Startup seed: the built-in permission vocabulary, the three built-in roles
//! and, when configured, a bootstrap super-admin. Safe to run on every boot;
//! grants are only ever added, so edits made at runtime survive restarts.

use std::collections::BTreeSet;

use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    auth::password::hash_password,
    rbac::{
        permissions::{seed_grants, ALL, SUPER_ADMIN},
        services::ensure_role,
    },
    state::AppState,
    store::{Permission, Role, StoreTx, DEFAULT_GUARD},
    users::{dto::ProfileFields, services::create_or_restore},
    validation,
};

async fn ensure_permission(tx: &mut dyn StoreTx, name: &str) -> anyhow::Result<bool> {
    tx.insert_permission(&Permission {
        id: Uuid::new_v4(),
        name: name.to_string(),
        guard_name: DEFAULT_GUARD.to_string(),
        created_at: OffsetDateTime::now_utc(),
    })
    .await
}

async fn ensure_role_row(tx: &mut dyn StoreTx, name: &str) -> anyhow::Result<Role> {
    if let Some(role) = tx.find_role_by_name(name, DEFAULT_GUARD).await? {
        return Ok(role);
    }
    let role = Role {
        id: Uuid::new_v4(),
        name: name.to_string(),
        guard_name: DEFAULT_GUARD.to_string(),
        created_at: OffsetDateTime::now_utc(),
    };
    tx.insert_role(&role).await?;
    info!(role = name, "seeded role");
    Ok(role)
}

#[instrument(skip(state))]
pub async fn run(state: &AppState) -> anyhow::Result<()> {
    let mut tx = state.store.begin().await?;

    let mut created = 0;
    for name in ALL {
        if ensure_permission(tx.as_mut(), name).await? {
            created += 1;
        }
    }

    for (role_name, grants) in seed_grants() {
        let role = ensure_role_row(tx.as_mut(), role_name).await?;
        let held: BTreeSet<String> = tx
            .role_permissions(role.id)
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect();
        let missing: Vec<String> = grants
            .into_iter()
            .filter(|g| !held.contains(*g))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            continue;
        }
        let ids: Vec<Uuid> = tx
            .find_permissions_by_names(&missing, DEFAULT_GUARD)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        tx.grant_permissions(role.id, &ids).await?;
    }

    if let Some(admin) = &state.config.seed_admin {
        let email = validation::email(&admin.email)
            .map_err(|e| anyhow::anyhow!("SEED_ADMIN_EMAIL: {e}"))?;
        let existing = tx
            .find_user_by_email(&email)
            .await?
            .filter(|u| u.is_active());
        let user_id = match existing {
            Some(user) => user.id,
            None => {
                let profile = ProfileFields {
                    first_name: "Super".into(),
                    last_name: Some("Admin".into()),
                    email,
                    birth_date: None,
                    gender: None,
                };
                let hash = hash_password(&admin.password)?;
                let (user, _) = create_or_restore(tx.as_mut(), profile, hash)
                    .await
                    .map_err(|e| anyhow::anyhow!("seed admin: {e}"))?;
                info!(user_id = %user.id, "seeded super-admin account");
                user.id
            }
        };
        ensure_role(tx.as_mut(), user_id, SUPER_ADMIN)
            .await
            .map_err(|e| anyhow::anyhow!("seed admin role: {e}"))?;
    }

    tx.commit().await?;
    info!(permissions_created = created, "seed applied");
    Ok(())
}
