use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::{
    notifier::{Lead, LeadKind},
    rate_limit::client_key,
};
use crate::{
    auth::password::{is_valid_email, normalize_email},
    error::AppError,
    state::AppState,
};

const MAX_NAME: usize = 100;
const MAX_MESSAGE: usize = 5_000;

pub fn routes() -> Router<AppState> {
    Router::new().route("/contact", post(submit))
}

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub message: String,
    #[serde(default)]
    pub kind: LeadKind,
}

#[derive(Debug, Serialize)]
pub struct ContactResponse {
    pub accepted: bool,
}

/// Trimmed and checked fields, or the first problem found.
pub fn validate(req: &ContactRequest) -> Result<(String, String, String), AppError> {
    let name = req.name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME {
        return Err(AppError::BadRequest(format!("name must be 1-{MAX_NAME} characters")));
    }
    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        return Err(AppError::BadRequest("invalid email".into()));
    }
    let message = req.message.trim();
    if message.is_empty() || message.chars().count() > MAX_MESSAGE {
        return Err(AppError::BadRequest(format!(
            "message must be 1-{MAX_MESSAGE} characters"
        )));
    }
    Ok((name.to_string(), email, message.to_string()))
}

#[instrument(skip_all)]
pub async fn submit(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<ContactRequest>,
) -> Result<(StatusCode, Json<ContactResponse>), AppError> {
    let client = client_key(&headers, peer.map(|ConnectInfo(addr)| addr));
    state
        .contact_limiter
        .check(&client)
        .await
        .map_err(|retry_after| {
            warn!(%client, "contact form rate limited");
            AppError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            }
        })?;

    let (name, email, message) = validate(&body)?;
    let lead = Lead {
        name,
        email,
        message,
        kind: body.kind,
        client,
        received_at: OffsetDateTime::now_utc(),
    };
    state
        .notifier
        .notify(&lead)
        .await
        .map_err(|e| AppError::Rpc(format!("lead notification: {e}")))?;
    info!(kind = ?lead.kind, "lead received");
    Ok((StatusCode::ACCEPTED, Json(ContactResponse { accepted: true })))
}
