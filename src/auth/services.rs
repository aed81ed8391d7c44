use std::collections::BTreeSet;

use axum::extract::FromRef;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{LoginInput, RegisterInput},
    jwt::JwtKeys,
    password::{hash_password, verify_dummy, verify_password},
};
use crate::{
    error::{AppError, AppResult},
    rbac::{authz, permissions::USER, services::ensure_role},
    state::AppState,
    store::{StoreTx, User},
    users::services::create_or_restore,
};

/// Successful login.
#[derive(Debug)]
pub struct Session {
    pub token: String,
    pub user: User,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
}

/// Records a new access token for `user_id` and returns it signed. The
/// user's expired token rows are dropped on the way.
pub(crate) async fn issue_token(
    keys: &JwtKeys,
    tx: &mut dyn StoreTx,
    user_id: Uuid,
) -> AppResult<String> {
    let record = keys.new_record(user_id);
    let purged = tx.delete_expired_tokens(user_id, record.created_at).await?;
    if purged > 0 {
        debug!(%user_id, purged, "expired tokens removed");
    }
    tx.insert_token(&record).await?;
    Ok(keys.sign(&record)?)
}

/// Registers a new account, or restores a soft-deleted one with the same
/// email. The account always ends up holding the `user` role exactly once.
#[instrument(skip(state, input), fields(email = %input.profile.email))]
pub async fn register(state: &AppState, input: RegisterInput) -> AppResult<User> {
    let hash = hash_password(&input.password)?;

    let mut tx = state.store.begin().await?;
    let (user, restored) = create_or_restore(tx.as_mut(), input.profile, hash).await?;
    ensure_role(tx.as_mut(), user.id, USER).await?;
    tx.commit().await?;

    info!(user_id = %user.id, restored, "user registered");
    Ok(user)
}

#[instrument(skip(state, input), fields(email = %input.email))]
pub async fn authenticate(state: &AppState, input: LoginInput) -> AppResult<Session> {
    let mut tx = state.store.begin().await?;
    let user = tx
        .find_user_by_email(&input.email)
        .await?
        .filter(User::is_active);

    let Some(user) = user else {
        verify_dummy(&input.password);
        warn!("login for unknown email");
        return Err(AppError::InvalidCredentials);
    };
    if !verify_password(&input.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(AppError::InvalidCredentials);
    }

    let keys = JwtKeys::from_ref(state);
    let token = issue_token(&keys, tx.as_mut(), user.id).await?;
    let roles = authz::role_names(tx.as_mut(), user.id).await?;
    let permissions = authz::effective_permissions(tx.as_mut(), user.id).await?;
    tx.commit().await?;

    info!(user_id = %user.id, "user logged in");
    Ok(Session {
        token,
        user,
        roles,
        permissions,
    })
}

/// Revokes exactly the presented token.
#[instrument(skip(state))]
pub async fn logout(state: &AppState, user_id: Uuid, token_id: Uuid) -> AppResult<()> {
    let mut tx = state.store.begin().await?;
    let revoked = tx.delete_token(token_id).await?;
    tx.commit().await?;

    if revoked {
        info!(%user_id, %token_id, "token revoked");
    } else {
        warn!(%user_id, %token_id, "token already revoked");
    }
    Ok(())
}

/// The caller's record with role names and effective permissions.
#[instrument(skip(state))]
pub async fn current_user(
    state: &AppState,
    user_id: Uuid,
) -> AppResult<(User, BTreeSet<String>, BTreeSet<String>)> {
    let mut tx = state.store.begin().await?;
    let user = tx
        .find_active_user(user_id)
        .await?
        .ok_or_else(|| AppError::unauthenticated("User not found"))?;
    let roles = authz::role_names(tx.as_mut(), user_id).await?;
    let permissions = authz::effective_permissions(tx.as_mut(), user_id).await?;
    tx.commit().await?;
    Ok((user, roles, permissions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::dto::{LoginRequest, RegisterRequest},
        rbac::permissions::{SUPER_ADMIN, USER, USER_VIEW},
        test_support::{seeded_state, soft_delete, user_with_roles, PASSWORD},
    };

    fn registration(email: &str, last_name: Option<&str>) -> RegisterInput {
        RegisterRequest {
            first_name: "Ann".into(),
            last_name: last_name.map(Into::into),
            email: email.into(),
            birth_date: Some("1995-05-05".into()),
            gender: Some("female".into()),
            password: PASSWORD.into(),
        }
        .validate()
        .unwrap()
    }

    fn login(email: &str, password: &str) -> LoginInput {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
        .validate()
        .unwrap()
    }

    async fn role_count(state: &AppState, user_id: Uuid) -> usize {
        let mut tx = state.store.begin().await.unwrap();
        tx.user_roles(user_id).await.unwrap().len()
    }

    #[tokio::test]
    async fn register_assigns_user_role() {
        let state = seeded_state().await;
        let user = register(&state, registration("ann@example.com", Some("Lee")))
            .await
            .unwrap();

        let mut tx = state.store.begin().await.unwrap();
        let roles = authz::role_names(tx.as_mut(), user.id).await.unwrap();
        assert_eq!(roles.into_iter().collect::<Vec<_>>(), vec![USER.to_string()]);
        assert_ne!(user.password_hash, PASSWORD);
    }

    #[tokio::test]
    async fn register_rejects_active_duplicate() {
        let state = seeded_state().await;
        register(&state, registration("ann@example.com", None))
            .await
            .unwrap();
        let err = register(&state, registration("ANN@example.com", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn register_restores_soft_deleted_account() {
        let state = seeded_state().await;
        let first = register(&state, registration("ann@example.com", Some("Lee")))
            .await
            .unwrap();
        soft_delete(&state, first.id).await;

        let again = register(&state, registration("ann@example.com", None))
            .await
            .unwrap();
        assert_eq!(again.id, first.id);
        assert!(again.is_active());
        assert_eq!(again.last_name.as_deref(), Some("Lee"));
        assert_eq!(role_count(&state, again.id).await, 1);
    }

    #[tokio::test]
    async fn bad_credentials_look_the_same() {
        let state = seeded_state().await;
        user_with_roles(&state, "ann@example.com", &[USER]).await;

        let unknown = authenticate(&state, login("nobody@example.com", PASSWORD))
            .await
            .unwrap_err();
        let wrong = authenticate(&state, login("ann@example.com", "wrong-password"))
            .await
            .unwrap_err();
        assert_eq!(unknown.kind(), wrong.kind());
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert!(matches!(unknown, AppError::InvalidCredentials));
    }

    #[tokio::test]
    async fn soft_deleted_user_cannot_log_in() {
        let state = seeded_state().await;
        let id = user_with_roles(&state, "gone@example.com", &[USER]).await;
        soft_delete(&state, id).await;

        let err = authenticate(&state, login("gone@example.com", PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
    }

    #[tokio::test]
    async fn login_reports_roles_and_permissions() {
        let state = seeded_state().await;
        let id = user_with_roles(&state, "ann@example.com", &[USER]).await;

        let session = authenticate(&state, login(" Ann@Example.com ", PASSWORD))
            .await
            .unwrap();
        assert_eq!(session.user.id, id);
        assert!(session.roles.contains(USER));
        assert!(session.permissions.contains(USER_VIEW));

        let claims = JwtKeys::from_ref(&state).verify(&session.token).unwrap();
        let mut tx = state.store.begin().await.unwrap();
        assert!(tx.find_token(claims.jti).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn logout_revokes_only_the_presented_token() {
        let state = seeded_state().await;
        let keys = JwtKeys::from_ref(&state);
        user_with_roles(&state, "ann@example.com", &[SUPER_ADMIN]).await;

        let a = authenticate(&state, login("ann@example.com", PASSWORD))
            .await
            .unwrap();
        let b = authenticate(&state, login("ann@example.com", PASSWORD))
            .await
            .unwrap();
        let a_claims = keys.verify(&a.token).unwrap();
        let b_claims = keys.verify(&b.token).unwrap();

        logout(&state, a_claims.sub, a_claims.jti).await.unwrap();
        // second logout with the same token is harmless
        logout(&state, a_claims.sub, a_claims.jti).await.unwrap();

        let mut tx = state.store.begin().await.unwrap();
        assert!(tx.find_token(a_claims.jti).await.unwrap().is_none());
        assert!(tx.find_token(b_claims.jti).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn login_sweeps_expired_tokens() {
        let state = seeded_state().await;
        let keys = JwtKeys::from_ref(&state);
        let ann = user_with_roles(&state, "ann@example.com", &[USER]).await;
        let bob = user_with_roles(&state, "bob@example.com", &[USER]).await;

        let stale = |user_id| {
            let mut record = keys.new_record(user_id);
            record.expires_at = record.created_at - time::Duration::hours(1);
            record
        };
        let (ann_stale, bob_stale) = (stale(ann), stale(bob));
        let mut tx = state.store.begin().await.unwrap();
        tx.insert_token(&ann_stale).await.unwrap();
        tx.insert_token(&bob_stale).await.unwrap();
        tx.commit().await.unwrap();

        let session = authenticate(&state, login("ann@example.com", PASSWORD))
            .await
            .unwrap();
        let fresh = keys.verify(&session.token).unwrap();

        let mut tx = state.store.begin().await.unwrap();
        assert!(tx.find_token(ann_stale.id).await.unwrap().is_none());
        assert!(tx.find_token(fresh.jti).await.unwrap().is_some());
        assert!(tx.find_token(bob_stale.id).await.unwrap().is_some());
    }
}
