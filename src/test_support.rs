//! Fixtures shared by the unit and HTTP tests.

use std::sync::Arc;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{jwt::JwtKeys, password::hash_password, services::issue_token},
    seed,
    state::AppState,
    storage::FakeStorage,
    store::{NewUser, DEFAULT_GUARD},
};

/// Password of every fixture user.
pub const PASSWORD: &str = "correct-horse";

lazy_static! {
    static ref PASSWORD_HASH: String = hash_password(PASSWORD).unwrap();
}

pub async fn seeded_state() -> AppState {
    let state = AppState::fake();
    seed::run(&state).await.unwrap();
    state
}

pub async fn seeded_state_with_blobs() -> (AppState, Arc<FakeStorage>) {
    let blobs = Arc::new(FakeStorage::default());
    let state = AppState::fake_with_storage(blobs.clone());
    seed::run(&state).await.unwrap();
    (state, blobs)
}

/// Inserts an active user holding exactly `roles`.
pub async fn user_with_roles(state: &AppState, email: &str, roles: &[&str]) -> Uuid {
    let user = NewUser {
        first_name: "Test".into(),
        last_name: None,
        email: email.into(),
        birth_date: None,
        gender: None,
        password_hash: PASSWORD_HASH.clone(),
    }
    .into_user(OffsetDateTime::now_utc());

    let mut tx = state.store.begin().await.unwrap();
    assert!(tx.insert_user(&user).await.unwrap(), "duplicate fixture email");
    let names: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
    let found = tx.find_roles_by_names(&names, DEFAULT_GUARD).await.unwrap();
    assert_eq!(found.len(), roles.len(), "unknown fixture role");
    let ids: Vec<Uuid> = found.iter().map(|r| r.id).collect();
    tx.assign_roles(user.id, &ids).await.unwrap();
    tx.commit().await.unwrap();
    user.id
}

pub async fn soft_delete(state: &AppState, user_id: Uuid) {
    let mut tx = state.store.begin().await.unwrap();
    let mut user = tx.find_active_user(user_id).await.unwrap().unwrap();
    user.deleted_at = Some(OffsetDateTime::now_utc());
    assert!(tx.update_user(&user).await.unwrap());
    tx.commit().await.unwrap();
}

/// Signed bearer token backed by a stored token record.
pub async fn token_for(state: &AppState, user_id: Uuid) -> String {
    let keys = JwtKeys::from_ref(state);
    let mut tx = state.store.begin().await.unwrap();
    let token = issue_token(&keys, tx.as_mut(), user_id).await.unwrap();
    tx.commit().await.unwrap();
    token
}
