mod dto;
pub mod handlers;
pub mod portions;
pub mod repo;

use axum::Router;

use crate::state::AppState;

pub use repo::Recipe;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
