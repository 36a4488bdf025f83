use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{ConsumeCreditsRequest, ConsumeCreditsResponse, WalletResponse},
    ledger::CreditTransaction,
    service::{check_and_consume_credits, validate_idempotency_key},
};
use crate::{
    auth::{AuthUser, MaybeAuthUser},
    dto::Pagination,
    error::AppError,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/wallet", get(get_wallet))
        .route("/wallet/transactions", get(list_transactions))
        .route("/credits/consume", post(consume))
}

#[instrument(skip(state))]
pub async fn get_wallet(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<WalletResponse>, AppError> {
    let wallet = state.ledger.wallet(user_id).await?;
    Ok(Json(wallet.into()))
}

#[instrument(skip(state))]
pub async fn list_transactions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<CreditTransaction>>, AppError> {
    let (limit, offset) = p.clamped();
    Ok(Json(state.ledger.transactions(user_id, limit, offset).await?))
}

#[instrument(skip(state, body))]
pub async fn consume(
    State(state): State<AppState>,
    MaybeAuthUser(session): MaybeAuthUser,
    Json(body): Json<ConsumeCreditsRequest>,
) -> Result<Json<ConsumeCreditsResponse>, AppError> {
    validate_idempotency_key(&body.idempotency_key).map_err(AppError::BadRequest)?;
    let price = body.feature.cost();
    let cost = body.cost.unwrap_or(price);
    if cost < price {
        return Err(AppError::BadRequest(format!(
            "cost for {} cannot be below {price}",
            body.feature.as_str()
        )));
    }

    let receipt = check_and_consume_credits(
        state.ledger.as_ref(),
        session,
        body.feature,
        cost,
        &body.idempotency_key,
    )
    .await?;
    Ok(Json(ConsumeCreditsResponse { receipt }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::{app::build_app, state::AppState};

    fn consume_request(token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/v1/credits/consume")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn consume_without_session_is_unauthorized() {
        let (state, ledger) = AppState::fake_with_wallet(Uuid::new_v4(), 5, 0);
        let res = build_app(state)
            .oneshot(consume_request(None, r#"{"feature":"menu_swap","idempotency_key":"k1"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["code"], "UNAUTHORIZED");
        assert_eq!(ledger.consume_calls(), 0);
    }

    #[tokio::test]
    async fn consume_debits_and_replays() {
        let user_id = Uuid::new_v4();
        let (state, _ledger) = AppState::fake_with_wallet(user_id, 1, 3);
        let token = state.access_token_for(user_id);
        let app = build_app(state);
        let body = r#"{"feature":"photo_scan","idempotency_key":"scan-42"}"#;

        let res = app.clone().oneshot(consume_request(Some(&token), body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["balance_after"], 2);
        assert_eq!(json["debited"]["subscription"], 1);
        assert_eq!(json["debited"]["lifetime"], 1);
        assert_eq!(json["replayed"], false);

        let res = app.oneshot(consume_request(Some(&token), body)).await.unwrap();
        let json = json_body(res).await;
        assert_eq!(json["replayed"], true);
        assert_eq!(json["balance_after"], 2);
    }

    #[tokio::test]
    async fn insufficient_credits_reports_balance() {
        let user_id = Uuid::new_v4();
        let (state, _ledger) = AppState::fake_with_wallet(user_id, 1, 0);
        let token = state.access_token_for(user_id);
        let res = build_app(state)
            .oneshot(consume_request(
                Some(&token),
                r#"{"feature":"fridge_inspiration","idempotency_key":"fr-1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);
        let json = json_body(res).await;
        assert_eq!(json["code"], "INSUFFICIENT_CREDITS");
        assert_eq!(json["balance"], 1);
        assert_eq!(json["required"], 2);
    }

    #[tokio::test]
    async fn cost_below_price_is_rejected() {
        let user_id = Uuid::new_v4();
        let (state, _ledger) = AppState::fake_with_wallet(user_id, 5, 0);
        let token = state.access_token_for(user_id);
        let res = build_app(state)
            .oneshot(consume_request(
                Some(&token),
                r#"{"feature":"photo_scan","cost":1,"idempotency_key":"k"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wallet_shows_total_balance() {
        let user_id = Uuid::new_v4();
        let (state, _ledger) = AppState::fake_with_wallet(user_id, 2, 7);
        let token = state.access_token_for(user_id);
        let res = build_app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/wallet")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["balance"], 9);
        assert_eq!(json["plan"], "free");
    }

    #[tokio::test]
    async fn transactions_list_the_callers_history() {
        let user_id = Uuid::new_v4();
        let (state, _ledger) = AppState::fake_with_wallet(user_id, 5, 0);
        let token = state.access_token_for(user_id);
        let app = build_app(state);
        let body = r#"{"feature":"photo_scan","idempotency_key":"scan-1"}"#;
        app.clone().oneshot(consume_request(Some(&token), body)).await.unwrap();
        // a replay adds no row
        app.clone().oneshot(consume_request(Some(&token), body)).await.unwrap();

        let res = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/wallet/transactions")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["kind"], "consume");
        assert_eq!(rows[0]["feature"], "photo_scan");
        assert_eq!(rows[0]["subscription_delta"], -2);
        assert_eq!(rows[0]["balance_after"], 3);
    }
}
