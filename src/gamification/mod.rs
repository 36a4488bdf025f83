mod dto;
pub mod handlers;
pub mod progress;
pub mod repo;

use axum::{middleware, Router};

use crate::{onboarding::require_onboarded, state::AppState};

pub use progress::{Award, Progress};
pub use repo::{AwardError, AwardOutcome};

/// The dashboard sits behind the onboarding gate; the profile and admin award do not.
pub fn router(state: AppState) -> Router<AppState> {
    let gated = handlers::dashboard_routes()
        .route_layer(middleware::from_fn_with_state(state, require_onboarded));
    handlers::routes().merge(gated)
}
