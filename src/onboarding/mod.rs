mod dto;
pub mod gate;
pub mod handlers;
pub mod middleware;
pub mod repo;

use axum::Router;
use uuid::Uuid;

use crate::state::AppState;

pub use gate::OnboardingState;
pub use middleware::require_onboarded;

pub fn router() -> Router<AppState> {
    handlers::routes()
}

/// Current onboarding state for `user_id`, honouring the fail-open setting.
pub async fn resolve_state(state: &AppState, user_id: Uuid) -> OnboardingState {
    let lookup = repo::completed_at(&state.db, user_id).await;
    OnboardingState::resolve(lookup, state.config.onboarding_fail_open)
}
