//! Persistence seam. Everything the services read or write goes through a
//! [`StoreTx`], so a guard check and the mutation it protects always share one
//! transaction.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod types;

pub use types::{AccessToken, Gender, NewUser, Permission, Role, User, DEFAULT_GUARD};

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTx>>;
}

/// One open transaction. Dropping it without [`StoreTx::commit`] rolls back.
#[async_trait]
pub trait StoreTx: Send {
    // ---- users ----

    /// Active (not soft-deleted) user by id.
    async fn find_active_user(&mut self, id: Uuid) -> anyhow::Result<Option<User>>;
    /// User by email regardless of soft-delete state.
    async fn find_user_by_email(&mut self, email: &str) -> anyhow::Result<Option<User>>;
    async fn list_active_users(&mut self) -> anyhow::Result<Vec<User>>;
    /// Returns `false` when the email is already taken.
    async fn insert_user(&mut self, user: &User) -> anyhow::Result<bool>;
    /// Overwrites every mutable column, `deleted_at` included. Returns `false`
    /// when the new email belongs to another row.
    async fn update_user(&mut self, user: &User) -> anyhow::Result<bool>;
    async fn lock_user(&mut self, id: Uuid) -> anyhow::Result<()>;

    // ---- roles ----

    async fn find_role(&mut self, id: Uuid) -> anyhow::Result<Option<Role>>;
    async fn find_role_by_name(&mut self, name: &str, guard: &str)
        -> anyhow::Result<Option<Role>>;
    async fn find_roles_by_names(&mut self, names: &[String], guard: &str)
        -> anyhow::Result<Vec<Role>>;
    async fn list_roles(&mut self) -> anyhow::Result<Vec<Role>>;
    /// Returns `false` when `(name, guard_name)` already exists.
    async fn insert_role(&mut self, role: &Role) -> anyhow::Result<bool>;
    /// Removes the role together with its association rows.
    async fn delete_role(&mut self, id: Uuid) -> anyhow::Result<()>;
    async fn lock_role(&mut self, id: Uuid) -> anyhow::Result<()>;
    async fn count_active_role_holders(&mut self, role_id: Uuid) -> anyhow::Result<i64>;

    // ---- permissions ----

    async fn find_permission(&mut self, id: Uuid) -> anyhow::Result<Option<Permission>>;
    async fn find_permissions_by_names(
        &mut self,
        names: &[String],
        guard: &str,
    ) -> anyhow::Result<Vec<Permission>>;
    async fn list_permissions(&mut self) -> anyhow::Result<Vec<Permission>>;
    /// Returns `false` when `(name, guard_name)` already exists.
    async fn insert_permission(&mut self, permission: &Permission) -> anyhow::Result<bool>;
    async fn delete_permission(&mut self, id: Uuid) -> anyhow::Result<()>;
    async fn lock_permission(&mut self, id: Uuid) -> anyhow::Result<()>;
    async fn count_permission_roles(&mut self, permission_id: Uuid) -> anyhow::Result<i64>;

    // ---- associations ----

    async fn role_permissions(&mut self, role_id: Uuid) -> anyhow::Result<Vec<Permission>>;
    async fn grant_permissions(&mut self, role_id: Uuid, permission_ids: &[Uuid])
        -> anyhow::Result<()>;
    async fn revoke_permissions(&mut self, role_id: Uuid, permission_ids: &[Uuid])
        -> anyhow::Result<()>;
    async fn user_roles(&mut self, user_id: Uuid) -> anyhow::Result<Vec<Role>>;
    async fn assign_roles(&mut self, user_id: Uuid, role_ids: &[Uuid]) -> anyhow::Result<()>;
    async fn unassign_roles(&mut self, user_id: Uuid, role_ids: &[Uuid]) -> anyhow::Result<()>;
    /// Distinct names of every permission reachable through the user's roles.
    async fn user_permission_names(&mut self, user_id: Uuid) -> anyhow::Result<Vec<String>>;

    // ---- tokens ----

    async fn insert_token(&mut self, token: &AccessToken) -> anyhow::Result<()>;
    async fn find_token(&mut self, id: Uuid) -> anyhow::Result<Option<AccessToken>>;
    /// Returns `false` when the token was already gone.
    async fn delete_token(&mut self, id: Uuid) -> anyhow::Result<bool>;
    /// Drops the user's tokens that expired before `now`. Returns how many went.
    async fn delete_expired_tokens(&mut self, user_id: Uuid, now: OffsetDateTime)
        -> anyhow::Result<u64>;

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}
