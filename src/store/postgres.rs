use anyhow::Context;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::{AccessToken, Gender, Permission, Role, Store, StoreTx, User};

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTx>> {
        let tx = self.db.begin().await.context("begin tx")?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

/// Row shape of `users`; gender is stored as text.
#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    first_name: String,
    last_name: Option<String>,
    email: String,
    birth_date: Option<Date>,
    gender: Option<String>,
    password_hash: String,
    profile_picture: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    deleted_at: Option<OffsetDateTime>,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let gender = r.gender.as_deref().map(str::parse::<Gender>).transpose()?;
        Ok(Self {
            id: r.id,
            first_name: r.first_name,
            last_name: r.last_name,
            email: r.email,
            birth_date: r.birth_date,
            gender,
            password_hash: r.password_hash,
            profile_picture: r.profile_picture,
            created_at: r.created_at,
            updated_at: r.updated_at,
            deleted_at: r.deleted_at,
        })
    }
}

const USER_COLUMNS: &str = "id, first_name, last_name, email, birth_date, gender, password_hash, \
                            profile_picture, created_at, updated_at, deleted_at";

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_active_user(&mut self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("find active user")?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&mut self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await
        .context("find user by email")?;
        row.map(User::try_from).transpose()
    }

    async fn list_active_users(&mut self) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY created_at, id"
        ))
        .fetch_all(&mut *self.tx)
        .await
        .context("list active users")?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn insert_user(&mut self, user: &User) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO users (id, first_name, last_name, email, birth_date, gender,
                               password_hash, profile_picture, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(user.birth_date)
        .bind(user.gender.map(|g| g.as_str()))
        .bind(&user.password_hash)
        .bind(&user.profile_picture)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.deleted_at)
        .execute(&mut *self.tx)
        .await
        .context("insert user")?;
        Ok(res.rows_affected() == 1)
    }

    async fn update_user(&mut self, user: &User) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET first_name = $2, last_name = $3, email = $4, birth_date = $5, gender = $6,
                   password_hash = $7, profile_picture = $8, updated_at = $9, deleted_at = $10
             WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(user.birth_date)
        .bind(user.gender.map(|g| g.as_str()))
        .bind(&user.password_hash)
        .bind(&user.profile_picture)
        .bind(user.updated_at)
        .bind(user.deleted_at)
        .execute(&mut *self.tx)
        .await;
        match res {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(anyhow::Error::new(e).context("update user")),
        }
    }

    async fn lock_user(&mut self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("lock user")?;
        Ok(())
    }

    async fn find_role(&mut self, id: Uuid) -> anyhow::Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT id, name, guard_name, created_at FROM roles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("find role")?;
        Ok(role)
    }

    async fn find_role_by_name(
        &mut self,
        name: &str,
        guard: &str,
    ) -> anyhow::Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT id, name, guard_name, created_at FROM roles WHERE name = $1 AND guard_name = $2",
        )
        .bind(name)
        .bind(guard)
        .fetch_optional(&mut *self.tx)
        .await
        .context("find role by name")?;
        Ok(role)
    }

    async fn find_roles_by_names(
        &mut self,
        names: &[String],
        guard: &str,
    ) -> anyhow::Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            r#"
            SELECT id, name, guard_name, created_at
              FROM roles
             WHERE name = ANY($1) AND guard_name = $2
             ORDER BY name
            "#,
        )
        .bind(names)
        .bind(guard)
        .fetch_all(&mut *self.tx)
        .await
        .context("find roles by names")?;
        Ok(roles)
    }

    async fn list_roles(&mut self) -> anyhow::Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT id, name, guard_name, created_at FROM roles ORDER BY name, guard_name",
        )
        .fetch_all(&mut *self.tx)
        .await
        .context("list roles")?;
        Ok(roles)
    }

    async fn insert_role(&mut self, role: &Role) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO roles (id, name, guard_name, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name, guard_name) DO NOTHING
            "#,
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.guard_name)
        .bind(role.created_at)
        .execute(&mut *self.tx)
        .await
        .context("insert role")?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete_role(&mut self, id: Uuid) -> anyhow::Result<()> {
        // role_permissions and user_roles cascade
        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .context("delete role")?;
        Ok(())
    }

    async fn lock_role(&mut self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("lock role")?;
        Ok(())
    }

    async fn count_active_role_holders(&mut self, role_id: Uuid) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
              FROM user_roles ur
              JOIN users u ON u.id = ur.user_id
             WHERE ur.role_id = $1 AND u.deleted_at IS NULL
            "#,
        )
        .bind(role_id)
        .fetch_one(&mut *self.tx)
        .await
        .context("count role holders")?;
        Ok(count)
    }

    async fn find_permission(&mut self, id: Uuid) -> anyhow::Result<Option<Permission>> {
        let permission = sqlx::query_as::<_, Permission>(
            "SELECT id, name, guard_name, created_at FROM permissions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("find permission")?;
        Ok(permission)
    }

    async fn find_permissions_by_names(
        &mut self,
        names: &[String],
        guard: &str,
    ) -> anyhow::Result<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            r#"
            SELECT id, name, guard_name, created_at
              FROM permissions
             WHERE name = ANY($1) AND guard_name = $2
             ORDER BY name
            "#,
        )
        .bind(names)
        .bind(guard)
        .fetch_all(&mut *self.tx)
        .await
        .context("find permissions by names")?;
        Ok(permissions)
    }

    async fn list_permissions(&mut self) -> anyhow::Result<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT id, name, guard_name, created_at FROM permissions ORDER BY name, guard_name",
        )
        .fetch_all(&mut *self.tx)
        .await
        .context("list permissions")?;
        Ok(permissions)
    }

    async fn insert_permission(&mut self, permission: &Permission) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO permissions (id, name, guard_name, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name, guard_name) DO NOTHING
            "#,
        )
        .bind(permission.id)
        .bind(&permission.name)
        .bind(&permission.guard_name)
        .bind(permission.created_at)
        .execute(&mut *self.tx)
        .await
        .context("insert permission")?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete_permission(&mut self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .context("delete permission")?;
        Ok(())
    }

    async fn lock_permission(&mut self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("SELECT id FROM permissions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("lock permission")?;
        Ok(())
    }

    async fn count_permission_roles(&mut self, permission_id: Uuid) -> anyhow::Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM role_permissions WHERE permission_id = $1")
                .bind(permission_id)
                .fetch_one(&mut *self.tx)
                .await
                .context("count permission roles")?;
        Ok(count)
    }

    async fn role_permissions(&mut self, role_id: Uuid) -> anyhow::Result<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            r#"
            SELECT p.id, p.name, p.guard_name, p.created_at
              FROM permissions p
              JOIN role_permissions rp ON rp.permission_id = p.id
             WHERE rp.role_id = $1
             ORDER BY p.name
            "#,
        )
        .bind(role_id)
        .fetch_all(&mut *self.tx)
        .await
        .context("role permissions")?;
        Ok(permissions)
    }

    async fn grant_permissions(
        &mut self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            SELECT $1, UNNEST($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_ids)
        .execute(&mut *self.tx)
        .await
        .context("grant permissions")?;
        Ok(())
    }

    async fn revoke_permissions(
        &mut self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = ANY($2)")
            .bind(role_id)
            .bind(permission_ids)
            .execute(&mut *self.tx)
            .await
            .context("revoke permissions")?;
        Ok(())
    }

    async fn user_roles(&mut self, user_id: Uuid) -> anyhow::Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            r#"
            SELECT r.id, r.name, r.guard_name, r.created_at
              FROM roles r
              JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = $1
             ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await
        .context("user roles")?;
        Ok(roles)
    }

    async fn assign_roles(&mut self, user_id: Uuid, role_ids: &[Uuid]) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, UNNEST($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(role_ids)
        .execute(&mut *self.tx)
        .await
        .context("assign roles")?;
        Ok(())
    }

    async fn unassign_roles(&mut self, user_id: Uuid, role_ids: &[Uuid]) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = ANY($2)")
            .bind(user_id)
            .bind(role_ids)
            .execute(&mut *self.tx)
            .await
            .context("unassign roles")?;
        Ok(())
    }

    async fn user_permission_names(&mut self, user_id: Uuid) -> anyhow::Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT p.name
              FROM permissions p
              JOIN role_permissions rp ON rp.permission_id = p.id
              JOIN user_roles ur ON ur.role_id = rp.role_id
             WHERE ur.user_id = $1
             ORDER BY p.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await
        .context("user permission names")?;
        Ok(names)
    }

    async fn insert_token(&mut self, token: &AccessToken) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO access_tokens (id, user_id, created_at, expires_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&mut *self.tx)
        .await
        .context("insert token")?;
        Ok(())
    }

    async fn find_token(&mut self, id: Uuid) -> anyhow::Result<Option<AccessToken>> {
        let token = sqlx::query_as::<_, AccessToken>(
            "SELECT id, user_id, created_at, expires_at FROM access_tokens WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("find token")?;
        Ok(token)
    }

    async fn delete_token(&mut self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM access_tokens WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .context("delete token")?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete_expired_tokens(
        &mut self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM access_tokens WHERE user_id = $1 AND expires_at < $2")
            .bind(user_id)
            .bind(now)
            .execute(&mut *self.tx)
            .await
            .context("delete expired tokens")?;
        Ok(res.rows_affected())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.tx.commit().await.context("commit tx")?;
        Ok(())
    }
}
