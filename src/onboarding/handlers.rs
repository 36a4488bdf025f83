use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{CompleteResponse, StatusQuery, StatusResponse, UpdateProfileRequest},
    gate::{GateDecision, NavigationGuard, OnboardingState},
    repo::{self, HouseholdUpdate, Profile},
};
use crate::{
    auth::AuthUser,
    error::AppError,
    gamification::{self, Award},
    state::AppState,
};

pub const MAX_HOUSEHOLD_MEMBERS: i32 = 12;
const MAX_RESTRICTIONS: usize = 20;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/onboarding/status", get(status))
        .route("/onboarding/complete", post(complete))
        .route("/profile", get(get_profile).put(update_profile))
}

/// Trim, lowercase and dedupe restriction tags.
pub fn normalize_restrictions(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for r in raw {
        let tag = r.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

pub fn validate_household(req: &UpdateProfileRequest) -> Result<HouseholdUpdate, AppError> {
    if !(1..=MAX_HOUSEHOLD_MEMBERS).contains(&req.adults) {
        return Err(AppError::BadRequest(format!(
            "adults must be between 1 and {MAX_HOUSEHOLD_MEMBERS}"
        )));
    }
    if !(0..=MAX_HOUSEHOLD_MEMBERS).contains(&req.children) {
        return Err(AppError::BadRequest(format!(
            "children must be between 0 and {MAX_HOUSEHOLD_MEMBERS}"
        )));
    }
    let dietary_restrictions = normalize_restrictions(&req.dietary_restrictions);
    if dietary_restrictions.len() > MAX_RESTRICTIONS {
        return Err(AppError::BadRequest("too many dietary restrictions".into()));
    }
    Ok(HouseholdUpdate {
        adults: req.adults,
        children: req.children,
        dietary_restrictions,
        onboarding_step: req.onboarding_step.map(|s| s.clamp(0, repo::FINAL_ONBOARDING_STEP)),
    })
}

#[instrument(skip(state))]
pub async fn status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<StatusQuery>,
) -> Json<StatusResponse> {
    let lookup = repo::completed_at(&state.db, user_id).await;
    let completed_at = lookup.as_ref().ok().copied().flatten();
    let onboarding = OnboardingState::resolve(lookup, state.config.onboarding_fail_open);

    let path = q.path.as_deref().unwrap_or("/app");
    let redirect_to = match NavigationGuard::new().check(path, onboarding) {
        GateDecision::Redirect(target) => Some(target),
        GateDecision::Allow => None,
    };

    Json(StatusResponse {
        state: onboarding,
        completed_at,
        redirect_to,
    })
}

#[instrument(skip(state))]
pub async fn complete(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<CompleteResponse>, AppError> {
    let (completed_at, newly_completed) = repo::complete(&state.db, user_id)
        .await?
        .ok_or(AppError::NotFound("profile"))?;

    if newly_completed {
        info!(%user_id, "onboarding completed");
        award_completion(&state, user_id).await;
    }

    Ok(Json(CompleteResponse {
        state: OnboardingState::Onboarded,
        completed_at,
    }))
}

/// Keyed per user, so completing twice never rewards twice.
pub fn completion_award(user_id: Uuid) -> Award {
    Award {
        event_type: "onboarding_completed".into(),
        points: 50,
        xp: 100,
        credits: 0,
        idempotency_key: format!("onboarding:{user_id}"),
    }
}

async fn award_completion(state: &AppState, user_id: Uuid) {
    if let Err(e) = gamification::repo::award(&state.db, user_id, &completion_award(user_id)).await {
        warn!(error = %e, %user_id, "onboarding reward failed");
    }
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Profile>, AppError> {
    repo::get_profile(&state.db, user_id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("profile"))
}

#[instrument(skip(state, body))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<Profile>, AppError> {
    let update = validate_household(&body)?;
    let profile = repo::update_household(&state.db, user_id, &update)
        .await?
        .ok_or(AppError::NotFound("profile"))?;
    info!(%user_id, adults = profile.adults, children = profile.children, "household updated");
    Ok(Json(profile))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::{app::build_app, gamification::Progress};

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn gated_route_fails_closed_when_lookup_breaks() {
        let user = Uuid::new_v4();
        let state = AppState::fake().fail_closed();
        let token = state.access_token_for(user);
        let res = build_app(state).oneshot(get("/api/v1/menus/current", &token)).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let body = json_body(res).await;
        assert_eq!(body["code"], "ONBOARDING_REQUIRED");
        assert_eq!(body["redirect_to"], "/app/onboarding");
    }

    #[tokio::test]
    async fn gated_route_fails_open_by_default() {
        let user = Uuid::new_v4();
        let state = AppState::fake();
        let token = state.access_token_for(user);
        let res = build_app(state).oneshot(get("/api/v1/menus/current", &token)).await.unwrap();
        // past the gate; the handler itself then hits the unreachable database
        let body = json_body(res).await;
        assert_ne!(body["code"], "ONBOARDING_REQUIRED");
    }

    #[tokio::test]
    async fn status_reports_fail_open_and_fail_closed() {
        let user = Uuid::new_v4();
        let state = AppState::fake();
        let token = state.access_token_for(user);

        let res = build_app(state.clone())
            .oneshot(get("/api/v1/onboarding/status?path=/app/menus", &token))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["state"], "onboarded");
        assert_eq!(body["redirect_to"], Value::Null);

        let res = build_app(state.fail_closed())
            .oneshot(get("/api/v1/onboarding/status?path=/app/menus", &token))
            .await
            .unwrap();
        let body = json_body(res).await;
        assert_eq!(body["state"], "needs_onboarding");
        assert_eq!(body["redirect_to"], "/app/onboarding");
    }

    #[tokio::test]
    async fn status_needs_a_session() {
        let res = build_app(AppState::fake())
            .oneshot(Request::builder().uri("/api/v1/onboarding/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn completion_award_applies_once_per_user() {
        let user = Uuid::new_v4();
        let first = completion_award(user);
        assert_eq!(first.idempotency_key, completion_award(user).idempotency_key);
        assert_ne!(first.idempotency_key, completion_award(Uuid::new_v4()).idempotency_key);

        let mut progress = Progress::default();
        let today = time::macros::date!(2026-03-02);
        progress.apply(&first, today);
        assert_eq!(progress.points, 50);
        assert_eq!(progress.xp, 100);
    }

    fn req(adults: i32, children: i32, restrictions: &[&str]) -> UpdateProfileRequest {
        UpdateProfileRequest {
            adults,
            children,
            dietary_restrictions: restrictions.iter().map(|s| s.to_string()).collect(),
            onboarding_step: Some(9),
        }
    }

    #[test]
    fn household_bounds() {
        assert!(validate_household(&req(0, 1, &[])).is_err());
        assert!(validate_household(&req(2, -1, &[])).is_err());
        assert!(validate_household(&req(2, 13, &[])).is_err());
        let ok = validate_household(&req(2, 3, &[])).unwrap();
        assert_eq!((ok.adults, ok.children), (2, 3));
        assert_eq!(ok.onboarding_step, Some(repo::FINAL_ONBOARDING_STEP));
    }

    #[test]
    fn restrictions_are_normalized() {
        let ok = validate_household(&req(1, 0, &[" Vegetarian", "vegetarian", "", "NUT_FREE"])).unwrap();
        assert_eq!(ok.dietary_restrictions, vec!["vegetarian", "nut_free"]);
    }
}
