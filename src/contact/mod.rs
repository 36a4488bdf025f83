pub mod handlers;
pub mod notifier;
pub mod rate_limit;

use axum::Router;

use crate::state::AppState;

pub use notifier::{LeadNotifier, N8nNotifier};
pub use rate_limit::RateLimiter;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
