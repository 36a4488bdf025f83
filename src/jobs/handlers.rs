use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::EnqueueJobRequest,
    model::{charge_key, AutomationJob, JobKind, NewJob},
    poller::{poll_until_terminal, PollPolicy},
    store::JobStoreError,
};
use crate::{
    auth::AuthUser,
    credits::{check_and_consume_credits, refund_charge, validate_idempotency_key, Debit},
    error::AppError,
    onboarding::repo as profiles,
    state::AppState,
    storage::{ext_from_mime, scan_photo_key, MAX_PHOTO_BYTES},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(enqueue))
        .route(
            "/jobs/scan",
            post(enqueue_scan).layer(DefaultBodyLimit::max(MAX_PHOTO_BYTES + 64 * 1024)),
        )
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/wait", get(wait_job))
}

/// Frigo and substitution jobs respect the household restrictions unless
/// the caller sent its own list.
async fn attach_restrictions(state: &AppState, user_id: Uuid, kind: JobKind, payload: &mut Value) {
    if kind == JobKind::Scan {
        return;
    }
    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    if obj.contains_key("restrictions") {
        return;
    }
    match profiles::get_profile(&state.db, user_id).await {
        Ok(Some(profile)) => {
            obj.insert("restrictions".into(), json!(profile.dietary_restrictions));
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, %user_id, "restrictions lookup failed, job runs without them"),
    }
}

/// Charge the job's feature, then enqueue it. A key seen before returns the
/// existing job without charging again.
async fn submit(
    state: &AppState,
    user_id: Uuid,
    kind: JobKind,
    mut payload: Value,
    key: &str,
) -> Result<(StatusCode, Json<AutomationJob>), AppError> {
    let key = key.trim();
    validate_idempotency_key(key).map_err(AppError::BadRequest)?;
    if let Some(existing) = state.jobs.find_by_key(user_id, key).await? {
        if existing.kind != kind {
            return Err(JobStoreError::KeyReused.into());
        }
        return Ok((StatusCode::OK, Json(existing)));
    }
    kind.validate_payload(user_id, &payload).map_err(AppError::BadRequest)?;
    attach_restrictions(state, user_id, kind, &mut payload).await;

    let feature = kind.feature();
    let charge_key = charge_key(key);
    let receipt = check_and_consume_credits(
        state.ledger.as_ref(),
        Some(user_id),
        feature,
        feature.cost(),
        &charge_key,
    )
    .await?;

    let new_job = NewJob {
        user_id,
        kind,
        payload,
        idempotency_key: key.to_string(),
        // a replayed receipt belongs to a concurrent submit that owns the charge
        charged: if receipt.replayed { Debit::default() } else { receipt.debited },
    };
    let (job, created) = match state.jobs.enqueue(&new_job).await {
        Ok(res) => res,
        Err(e) => {
            if let Err(refund_err) = refund_charge(state.ledger.as_ref(), user_id, &charge_key).await {
                warn!(error = %refund_err, %user_id, "refund after failed enqueue failed");
            }
            return Err(e.into());
        }
    };

    if created {
        info!(job_id = %job.id, %user_id, kind = kind.as_str(), "job enqueued");
        Ok((StatusCode::ACCEPTED, Json(job)))
    } else {
        Ok((StatusCode::OK, Json(job)))
    }
}

#[instrument(skip(state, body))]
pub async fn enqueue(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<EnqueueJobRequest>,
) -> Result<(StatusCode, Json<AutomationJob>), AppError> {
    submit(&state, user_id, body.kind, body.payload, &body.idempotency_key).await
}

/// Multipart `photo` (or `file`) plus `idempotency_key` as a field or an
/// `Idempotency-Key` header.
#[instrument(skip(state, headers, mp))]
pub async fn enqueue_scan(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    mut mp: Multipart,
) -> Result<(StatusCode, Json<AutomationJob>), AppError> {
    let mut key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut photo: Option<(Bytes, String)> = None;

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("photo") | Some("file") => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                photo = Some((data, content_type));
            }
            Some("idempotency_key") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                key = Some(text);
            }
            _ => {}
        }
    }

    let key = key.ok_or_else(|| AppError::BadRequest("idempotency_key is required".into()))?;
    validate_idempotency_key(&key).map_err(AppError::BadRequest)?;
    if let Some(existing) = state.jobs.find_by_key(user_id, key.trim()).await? {
        if existing.kind != JobKind::Scan {
            return Err(JobStoreError::KeyReused.into());
        }
        return Ok((StatusCode::OK, Json(existing)));
    }

    let (data, content_type) =
        photo.ok_or_else(|| AppError::BadRequest("photo is required".into()))?;
    if data.is_empty() || data.len() > MAX_PHOTO_BYTES {
        return Err(AppError::BadRequest("photo must be between 1 byte and 10 MB".into()));
    }
    let ext = ext_from_mime(&content_type)
        .ok_or_else(|| AppError::BadRequest("photo must be jpeg, png, webp or heic".into()))?;

    let photo_key = scan_photo_key(user_id, Uuid::new_v4(), ext);
    state
        .storage
        .put_object(&photo_key, data, &content_type)
        .await?;

    let payload = json!({ "photo_key": photo_key, "content_type": content_type });
    match submit(&state, user_id, JobKind::Scan, payload, &key).await {
        Ok(res) => Ok(res),
        Err(e) => {
            if let Err(del) = state.storage.delete_object(&photo_key).await {
                warn!(error = %del, %photo_key, "orphan scan photo left behind");
            }
            Err(e)
        }
    }
}

#[instrument(skip(state))]
pub async fn get_job(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<AutomationJob>, AppError> {
    state
        .jobs
        .get(user_id, id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("job"))
}

/// Long-poll until the job is terminal or the budget runs out.
#[instrument(skip(state))]
pub async fn wait_job(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<AutomationJob>, AppError> {
    let policy = PollPolicy::from(&state.config.jobs);
    let job = poll_until_terminal(state.jobs.as_ref(), user_id, id, policy).await?;
    Ok(Json(job))
}
