//! In-process store used by `AppState::fake()` and the test suite.
//!
//! A transaction holds the store mutex for its whole lifetime and mutates a
//! working copy, which replaces the shared state on commit. Dropping the
//! transaction discards the copy.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{AccessToken, Permission, Role, Store, StoreTx, User};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    /// (role_id, permission_id)
    role_permissions: BTreeSet<(Uuid, Uuid)>,
    /// (user_id, role_id)
    user_roles: BTreeSet<(Uuid, Uuid)>,
    tokens: HashMap<Uuid, AccessToken>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

fn sorted_roles<'a>(it: impl Iterator<Item = &'a Role>) -> Vec<Role> {
    let mut roles: Vec<Role> = it.cloned().collect();
    roles.sort_by(|a, b| (&a.name, &a.guard_name).cmp(&(&b.name, &b.guard_name)));
    roles
}

fn sorted_permissions<'a>(it: impl Iterator<Item = &'a Permission>) -> Vec<Permission> {
    let mut permissions: Vec<Permission> = it.cloned().collect();
    permissions.sort_by(|a, b| (&a.name, &a.guard_name).cmp(&(&b.name, &b.guard_name)));
    permissions
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_active_user(&mut self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.work.users.get(&id).filter(|u| u.is_active()).cloned())
    }

    async fn find_user_by_email(&mut self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.work.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_active_users(&mut self) -> anyhow::Result<Vec<User>> {
        let mut users: Vec<User> = self
            .work
            .users
            .values()
            .filter(|u| u.is_active())
            .cloned()
            .collect();
        users.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(users)
    }

    async fn insert_user(&mut self, user: &User) -> anyhow::Result<bool> {
        if self.work.users.values().any(|u| u.email == user.email) {
            return Ok(false);
        }
        self.work.users.insert(user.id, user.clone());
        Ok(true)
    }

    async fn update_user(&mut self, user: &User) -> anyhow::Result<bool> {
        let taken = self
            .work
            .users
            .values()
            .any(|u| u.email == user.email && u.id != user.id);
        if taken {
            return Ok(false);
        }
        if let Some(stored) = self.work.users.get_mut(&user.id) {
            *stored = user.clone();
        }
        Ok(true)
    }

    async fn lock_user(&mut self, _id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    async fn find_role(&mut self, id: Uuid) -> anyhow::Result<Option<Role>> {
        Ok(self.work.roles.get(&id).cloned())
    }

    async fn find_role_by_name(
        &mut self,
        name: &str,
        guard: &str,
    ) -> anyhow::Result<Option<Role>> {
        Ok(self
            .work
            .roles
            .values()
            .find(|r| r.name == name && r.guard_name == guard)
            .cloned())
    }

    async fn find_roles_by_names(
        &mut self,
        names: &[String],
        guard: &str,
    ) -> anyhow::Result<Vec<Role>> {
        Ok(sorted_roles(
            self.work
                .roles
                .values()
                .filter(|r| r.guard_name == guard && names.contains(&r.name)),
        ))
    }

    async fn list_roles(&mut self) -> anyhow::Result<Vec<Role>> {
        Ok(sorted_roles(self.work.roles.values()))
    }

    async fn insert_role(&mut self, role: &Role) -> anyhow::Result<bool> {
        let exists = self
            .work
            .roles
            .values()
            .any(|r| r.name == role.name && r.guard_name == role.guard_name);
        if exists {
            return Ok(false);
        }
        self.work.roles.insert(role.id, role.clone());
        Ok(true)
    }

    async fn delete_role(&mut self, id: Uuid) -> anyhow::Result<()> {
        self.work.roles.remove(&id);
        self.work.role_permissions.retain(|(role_id, _)| *role_id != id);
        self.work.user_roles.retain(|(_, role_id)| *role_id != id);
        Ok(())
    }

    async fn lock_role(&mut self, _id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    async fn count_active_role_holders(&mut self, role_id: Uuid) -> anyhow::Result<i64> {
        let users = &self.work.users;
        let count = self
            .work
            .user_roles
            .iter()
            .filter(|(user_id, rid)| {
                *rid == role_id && users.get(user_id).is_some_and(User::is_active)
            })
            .count();
        Ok(count as i64)
    }

    async fn find_permission(&mut self, id: Uuid) -> anyhow::Result<Option<Permission>> {
        Ok(self.work.permissions.get(&id).cloned())
    }

    async fn find_permissions_by_names(
        &mut self,
        names: &[String],
        guard: &str,
    ) -> anyhow::Result<Vec<Permission>> {
        Ok(sorted_permissions(
            self.work
                .permissions
                .values()
                .filter(|p| p.guard_name == guard && names.contains(&p.name)),
        ))
    }

    async fn list_permissions(&mut self) -> anyhow::Result<Vec<Permission>> {
        Ok(sorted_permissions(self.work.permissions.values()))
    }

    async fn insert_permission(&mut self, permission: &Permission) -> anyhow::Result<bool> {
        let exists = self
            .work
            .permissions
            .values()
            .any(|p| p.name == permission.name && p.guard_name == permission.guard_name);
        if exists {
            return Ok(false);
        }
        self.work
            .permissions
            .insert(permission.id, permission.clone());
        Ok(true)
    }

    async fn delete_permission(&mut self, id: Uuid) -> anyhow::Result<()> {
        self.work.permissions.remove(&id);
        self.work
            .role_permissions
            .retain(|(_, permission_id)| *permission_id != id);
        Ok(())
    }

    async fn lock_permission(&mut self, _id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    async fn count_permission_roles(&mut self, permission_id: Uuid) -> anyhow::Result<i64> {
        let count = self
            .work
            .role_permissions
            .iter()
            .filter(|(_, pid)| *pid == permission_id)
            .count();
        Ok(count as i64)
    }

    async fn role_permissions(&mut self, role_id: Uuid) -> anyhow::Result<Vec<Permission>> {
        let permissions = &self.work.permissions;
        Ok(sorted_permissions(
            self.work
                .role_permissions
                .iter()
                .filter(|(rid, _)| *rid == role_id)
                .filter_map(|(_, pid)| permissions.get(pid)),
        ))
    }

    async fn grant_permissions(
        &mut self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> anyhow::Result<()> {
        anyhow::ensure!(self.work.roles.contains_key(&role_id), "unknown role {role_id}");
        for pid in permission_ids {
            anyhow::ensure!(
                self.work.permissions.contains_key(pid),
                "unknown permission {pid}"
            );
            self.work.role_permissions.insert((role_id, *pid));
        }
        Ok(())
    }

    async fn revoke_permissions(
        &mut self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> anyhow::Result<()> {
        for pid in permission_ids {
            self.work.role_permissions.remove(&(role_id, *pid));
        }
        Ok(())
    }

    async fn user_roles(&mut self, user_id: Uuid) -> anyhow::Result<Vec<Role>> {
        let roles = &self.work.roles;
        Ok(sorted_roles(
            self.work
                .user_roles
                .iter()
                .filter(|(uid, _)| *uid == user_id)
                .filter_map(|(_, rid)| roles.get(rid)),
        ))
    }

    async fn assign_roles(&mut self, user_id: Uuid, role_ids: &[Uuid]) -> anyhow::Result<()> {
        anyhow::ensure!(self.work.users.contains_key(&user_id), "unknown user {user_id}");
        for rid in role_ids {
            anyhow::ensure!(self.work.roles.contains_key(rid), "unknown role {rid}");
            self.work.user_roles.insert((user_id, *rid));
        }
        Ok(())
    }

    async fn unassign_roles(&mut self, user_id: Uuid, role_ids: &[Uuid]) -> anyhow::Result<()> {
        for rid in role_ids {
            self.work.user_roles.remove(&(user_id, *rid));
        }
        Ok(())
    }

    async fn user_permission_names(&mut self, user_id: Uuid) -> anyhow::Result<Vec<String>> {
        let role_ids: BTreeSet<Uuid> = self
            .work
            .user_roles
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, rid)| *rid)
            .collect();
        let names: BTreeSet<String> = self
            .work
            .role_permissions
            .iter()
            .filter(|(rid, _)| role_ids.contains(rid))
            .filter_map(|(_, pid)| self.work.permissions.get(pid))
            .map(|p| p.name.clone())
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn insert_token(&mut self, token: &AccessToken) -> anyhow::Result<()> {
        self.work.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_token(&mut self, id: Uuid) -> anyhow::Result<Option<AccessToken>> {
        Ok(self.work.tokens.get(&id).cloned())
    }

    async fn delete_token(&mut self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.work.tokens.remove(&id).is_some())
    }

    async fn delete_expired_tokens(
        &mut self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<u64> {
        let before = self.work.tokens.len();
        self.work
            .tokens
            .retain(|_, t| t.user_id != user_id || t.expires_at >= now);
        Ok((before - self.work.tokens.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn role(name: &str) -> Role {
        Role {
            id: Uuid::new_v4(),
            name: name.into(),
            guard_name: "web".into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_role(&role("editor")).await.unwrap());
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.list_roles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_role(&role("editor")).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let roles = tx.list_roles().await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, "editor");
    }

    #[tokio::test]
    async fn role_names_are_unique_per_guard() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_role(&role("editor")).await.unwrap());
        assert!(!tx.insert_role(&role("editor")).await.unwrap());

        let mut api = role("editor");
        api.guard_name = "api".into();
        assert!(tx.insert_role(&api).await.unwrap());
    }

    #[tokio::test]
    async fn delete_role_cascades_associations() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let r = role("editor");
        let p = Permission {
            id: Uuid::new_v4(),
            name: "post.edit".into(),
            guard_name: "web".into(),
            created_at: OffsetDateTime::now_utc(),
        };
        tx.insert_role(&r).await.unwrap();
        tx.insert_permission(&p).await.unwrap();
        tx.grant_permissions(r.id, &[p.id]).await.unwrap();
        assert_eq!(tx.count_permission_roles(p.id).await.unwrap(), 1);

        tx.delete_role(r.id).await.unwrap();
        assert_eq!(tx.count_permission_roles(p.id).await.unwrap(), 0);
    }
}
