//! Back-office surface. Every route requires [`AdminUser`].

pub mod check;
mod dto;
pub mod extractor;
pub mod handlers;

use axum::Router;

use crate::state::AppState;

pub use check::AdminCheck;
pub use extractor::AdminUser;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
