use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{DiagnosticsResponse, GrantCreditsRequest, JobCount, SetAdminRequest},
    extractor::AdminUser,
};
use crate::{
    auth::User,
    credits::{validate_idempotency_key, GrantRequest, TxKind, Wallet},
    dto::Pagination,
    error::AppError,
    state::AppState,
};

pub const MAX_GRANT: i64 = 10_000;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id/admin", put(set_admin))
        .route("/admin/users/:id/credits", post(grant_credits))
        .route("/admin/users/:id/credit-reset", post(force_reset))
        .route("/admin/diagnostics", get(diagnostics))
}

pub fn validate_grant(req: &GrantCreditsRequest) -> Result<(), AppError> {
    if !(1..=MAX_GRANT).contains(&req.amount) {
        return Err(AppError::BadRequest(format!(
            "amount must be between 1 and {MAX_GRANT}"
        )));
    }
    validate_idempotency_key(&req.idempotency_key).map_err(AppError::BadRequest)
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<User>>, AppError> {
    let (limit, offset) = p.clamped();
    Ok(Json(User::list(&state.db, limit, offset).await?))
}

#[instrument(skip(state))]
pub async fn set_admin(
    State(state): State<AppState>,
    AdminUser(admin_id): AdminUser,
    Path(user_id): Path<Uuid>,
    Json(body): Json<SetAdminRequest>,
) -> Result<Json<User>, AppError> {
    if user_id == admin_id && !body.is_admin {
        return Err(AppError::BadRequest("admins cannot revoke their own role".into()));
    }
    if !User::set_admin(&state.db, user_id, body.is_admin).await? {
        return Err(AppError::NotFound("user"));
    }
    info!(%admin_id, %user_id, is_admin = body.is_admin, "admin role changed");
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(user))
}

#[instrument(skip(state, body))]
pub async fn grant_credits(
    State(state): State<AppState>,
    AdminUser(admin_id): AdminUser,
    Path(user_id): Path<Uuid>,
    Json(body): Json<GrantCreditsRequest>,
) -> Result<Json<Wallet>, AppError> {
    validate_grant(&body)?;
    let wallet = state
        .ledger
        .grant(&GrantRequest {
            user_id,
            pool: body.pool,
            amount: body.amount,
            kind: TxKind::Grant,
            idempotency_key: Some(format!("admin:{}", body.idempotency_key)),
        })
        .await?;
    info!(%admin_id, %user_id, amount = body.amount, pool = ?body.pool, "credits granted");
    Ok(Json(wallet))
}

/// Start a new cycle now, even when the scheduled reset is still ahead.
#[instrument(skip(state))]
pub async fn force_reset(
    State(state): State<AppState>,
    AdminUser(admin_id): AdminUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Wallet>, AppError> {
    let wallet = state.ledger.wallet(user_id).await?;
    let at = wallet.next_reset_at.max(OffsetDateTime::now_utc());
    let outcome = state.ledger.apply_reset(user_id, at).await?;
    info!(%admin_id, %user_id, reset = outcome.is_some(), "forced credit reset");
    Ok(Json(state.ledger.wallet(user_id).await?))
}

#[instrument(skip(state))]
pub async fn diagnostics(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<DiagnosticsResponse>, AppError> {
    let started = Instant::now();
    let database_ok = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "database ping failed");
            false
        }
    };
    let database_latency_ms = database_ok.then(|| started.elapsed().as_millis());

    let jobs = state
        .jobs
        .count_by_status()
        .await?
        .into_iter()
        .map(|(status, count)| JobCount { status, count })
        .collect();

    let wallets_due_for_reset = if database_ok {
        let (due,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM wallets WHERE next_reset_at <= now()")
                .fetch_one(&state.db)
                .await?;
        due
    } else {
        0
    };

    Ok(Json(DiagnosticsResponse {
        database_ok,
        database_latency_ms,
        jobs,
        wallets_due_for_reset,
        admin_checks_in_flight: state.admin_checks.in_flight().await,
    }))
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
    use crate::{app::build_app, credits::CreditPool, state::AppState};

    fn grant(amount: i64, key: &str) -> GrantCreditsRequest {
        GrantCreditsRequest {
            amount,
            pool: CreditPool::Lifetime,
            idempotency_key: key.into(),
        }
    }

    #[test]
    fn grant_bounds() {
        assert!(validate_grant(&grant(1, "support-123")).is_ok());
        assert!(validate_grant(&grant(MAX_GRANT, "k")).is_ok());
        assert!(validate_grant(&grant(0, "k")).is_err());
        assert!(validate_grant(&grant(MAX_GRANT + 1, "k")).is_err());
        assert!(validate_grant(&grant(5, "")).is_err());
    }

    #[test]
    fn grant_pool_defaults_to_lifetime() {
        let req: GrantCreditsRequest =
            serde_json::from_str(r#"{"amount":3,"idempotency_key":"k"}"#).unwrap();
        assert_eq!(req.pool, CreditPool::Lifetime);
    }

    #[tokio::test]
    async fn admin_routes_require_a_session() {
        let res = build_app(AppState::fake())
            .oneshot(Request::builder().uri("/api/v1/admin/users").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn failed_admin_lookup_denies_access() {
        let state = AppState::fake();
        let token = state.access_token_for(Uuid::new_v4());
        let res = build_app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/admin/diagnostics")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["code"], "RPC_ERROR");
    }
}
