use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument};

use super::{
    dto::{AdminAwardRequest, DashboardResponse, GamificationProfileResponse},
    progress::Award,
    repo::{self, AwardOutcome},
};
use crate::{
    admin::AdminUser,
    auth::AuthUser,
    credits::validate_idempotency_key,
    error::AppError,
    menus::{self, model::week_start_for},
    onboarding,
    state::AppState,
};

const RECENT_EVENTS: i64 = 20;
const MAX_AWARD_CREDITS: i64 = 1_000;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/gamification/profile", get(profile))
        .route("/admin/gamification/award", post(admin_award))
}

pub fn dashboard_routes() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard))
}

/// Reject awards that could not have come from a well-formed event.
pub fn validate_award(award: &Award) -> Result<(), AppError> {
    validate_idempotency_key(&award.idempotency_key).map_err(AppError::BadRequest)?;
    let event_type = award.event_type.trim();
    if event_type.is_empty() || event_type.len() > 64 {
        return Err(AppError::BadRequest("event_type must be 1-64 characters".into()));
    }
    if !(0..=MAX_AWARD_CREDITS).contains(&award.credits) {
        return Err(AppError::BadRequest(format!(
            "credits must be between 0 and {MAX_AWARD_CREDITS}"
        )));
    }
    Ok(())
}

#[instrument(skip(state))]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<GamificationProfileResponse>, AppError> {
    let progress = repo::get_progress(&state.db, user_id).await?;
    let recent_events = repo::recent_events(&state.db, user_id, RECENT_EVENTS).await?;
    Ok(Json(GamificationProfileResponse {
        progress,
        recent_events,
    }))
}

#[instrument(skip(state))]
pub async fn dashboard(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<DashboardResponse>, AppError> {
    let wallet = state.ledger.wallet(user_id).await?;
    let progress = repo::get_progress(&state.db, user_id).await?;
    let onboarding = onboarding::resolve_state(&state, user_id).await;
    let week_start = week_start_for(OffsetDateTime::now_utc().date());
    let has_current_menu = menus::repo::get(&state.db, user_id, week_start).await?.is_some();

    Ok(Json(DashboardResponse {
        balance: wallet.balance(),
        wallet,
        progress,
        onboarding,
        has_current_menu,
    }))
}

#[instrument(skip(state, body))]
pub async fn admin_award(
    State(state): State<AppState>,
    AdminUser(admin_id): AdminUser,
    Json(body): Json<AdminAwardRequest>,
) -> Result<Json<AwardOutcome>, AppError> {
    validate_award(&body.award)?;
    let outcome = repo::award(&state.db, body.user_id, &body.award).await?;
    info!(%admin_id, user_id = %body.user_id, applied = outcome.applied, "admin award");
    Ok(Json(outcome))
}
