pub mod authz;
pub mod dto;
pub mod handlers;
pub mod permissions;
pub mod services;
pub mod sync;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::role_routes())
        .merge(handlers::permission_routes())
        .merge(handlers::assignment_routes())
}
