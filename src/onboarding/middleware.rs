use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::{
    gate::{decide, GateDecision},
    resolve_state,
};
use crate::{auth::AuthUser, error::AppError, state::AppState};

/// Reject requests from users who have not finished onboarding.
pub async fn require_onboarded(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let onboarding = resolve_state(&state, user_id).await;
    match decide(req.uri().path(), onboarding) {
        GateDecision::Allow => Ok(next.run(req).await),
        GateDecision::Redirect(redirect_to) => {
            debug!(%user_id, path = %req.uri().path(), "onboarding required");
            Err(AppError::OnboardingRequired { redirect_to })
        }
    }
}
