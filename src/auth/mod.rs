use crate::state::AppState;
use axum::Router;

pub mod clock;
pub mod cookie;
pub mod dto;
pub mod errors;
pub(crate) mod extractors;
pub mod handlers;
pub mod notify;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod tokens;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}
