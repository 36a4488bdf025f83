use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::warn;
use uuid::Uuid;

use crate::{
    auth::{AuthUser, User},
    error::AppError,
    state::AppState,
};

/// Authenticated caller with the admin flag set.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;
        let db = state.db.clone();
        let is_admin = state
            .admin_checks
            .check(user_id, || async move {
                User::is_admin(&db, user_id).await.map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| {
                warn!(error = %e, %user_id, "admin lookup failed");
                AppError::Rpc("admin lookup failed".into())
            })?;
        if is_admin {
            Ok(AdminUser(user_id))
        } else {
            Err(AppError::Forbidden)
        }
    }
}
