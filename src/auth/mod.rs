use crate::state::AppState;
use axum::Router;

mod claims;
pub mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod services;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new().nest("/api/auth", handlers::auth_routes(state))
}
