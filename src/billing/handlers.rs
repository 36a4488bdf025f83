use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::signature;
use crate::{
    auth::{repo::is_premium_status, User},
    config::CreditsConfig,
    credits::{CreditLedger, CreditPool, GrantRequest, LedgerError, Plan, TxKind, Wallet},
    error::AppError,
    state::AppState,
};

const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn routes() -> Router<AppState> {
    Router::new().route("/billing/stripe/webhook", post(stripe_webhook))
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub handled: bool,
}

/// Stripe metadata values are strings.
fn metadata<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object.get("metadata")?.get(key)?.as_str()
}

fn metadata_user(object: &Value) -> Option<Uuid> {
    metadata(object, "user_id").and_then(|raw| Uuid::parse_str(raw).ok())
}

/// `(user, credits)` for a paid checkout carrying both metadata fields.
pub fn checkout_grant(object: &Value) -> Option<(Uuid, i64)> {
    if object
        .get("payment_status")
        .and_then(Value::as_str)
        .is_some_and(|status| status != "paid")
    {
        return None;
    }
    let user_id = metadata_user(object)?;
    let credits = metadata(object, "credits")?.parse::<i64>().ok()?;
    (credits > 0).then_some((user_id, credits))
}

/// `customer.subscription.*` carries the new status; deletion always cancels.
fn subscription_status<'a>(kind: &str, object: &'a Value) -> &'a str {
    if kind == "customer.subscription.deleted" {
        "canceled"
    } else {
        object.get("status").and_then(Value::as_str).unwrap_or("incomplete")
    }
}

/// Move the wallet onto the plan matching `status`, once per event id.
pub async fn apply_subscription(
    ledger: &dyn CreditLedger,
    credits: &CreditsConfig,
    event_id: &str,
    user_id: Uuid,
    status: &str,
) -> Result<Wallet, LedgerError> {
    let (plan, allowance) = if is_premium_status(status) {
        (Plan::Premium, credits.premium_monthly)
    } else {
        (Plan::Free, credits.free_monthly)
    };
    ledger
        .change_plan(user_id, plan, allowance, Some(&format!("stripe:{event_id}")))
        .await
}

#[instrument(skip_all)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("missing Stripe-Signature".into()))?;
    signature::verify(
        &state.config.stripe_webhook_secret,
        header,
        &body,
        OffsetDateTime::now_utc().unix_timestamp(),
    )
    .map_err(|e| {
        warn!(error = %e, "rejected webhook");
        AppError::BadRequest(e.to_string())
    })?;

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid event: {e}")))?;
    let handled = handle_event(&state, &event).await?;
    Ok(Json(WebhookAck {
        received: true,
        handled,
    }))
}

async fn handle_event(state: &AppState, event: &StripeEvent) -> Result<bool, AppError> {
    let object = &event.data.object;
    match event.kind.as_str() {
        "checkout.session.completed" => {
            let Some((user_id, credits)) = checkout_grant(object) else {
                warn!(event_id = %event.id, "checkout without usable metadata");
                return Ok(false);
            };
            let wallet = state
                .ledger
                .grant(&GrantRequest {
                    user_id,
                    pool: CreditPool::Lifetime,
                    amount: credits,
                    kind: TxKind::Purchase,
                    idempotency_key: Some(format!("stripe:{}", event.id)),
                })
                .await?;
            info!(event_id = %event.id, %user_id, credits, balance = wallet.balance(), "credits purchased");
            Ok(true)
        }
        kind if kind.starts_with("customer.subscription.") => {
            let Some(user_id) = metadata_user(object) else {
                warn!(event_id = %event.id, "subscription without user metadata");
                return Ok(false);
            };
            let status = subscription_status(kind, object);
            if !User::set_subscription_status(&state.db, user_id, status).await? {
                return Err(AppError::NotFound("user"));
            }
            let wallet =
                apply_subscription(state.ledger.as_ref(), &state.config.credits, &event.id, user_id, status)
                    .await?;
            info!(event_id = %event.id, %user_id, status, plan = wallet.plan.as_str(), "subscription updated");
            Ok(true)
        }
        other => {
            info!(event_id = %event.id, kind = other, "ignored webhook event");
            Ok(false)
        }
    }
}
