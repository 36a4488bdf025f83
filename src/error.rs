use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

use crate::{
    ai::AiError,
    auth::repo::RegisterError,
    credits::{ConsumeError, LedgerError},
    gamification::AwardError,
    jobs::{JobStoreError, PollError},
};

/// Error returned by every handler, rendered as `{"code", "message", ...}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("admin privileges required")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    #[error("no recipe matches the household dietary restrictions")]
    NoSafeRecipes,

    #[error("generated menu failed safety validation: {0}")]
    SafetyValidationFailed(String),

    #[error("onboarding must be completed first")]
    OnboardingRequired { redirect_to: &'static str },

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("job did not finish within {0}s")]
    JobTimeout(u64),

    #[error("too many requests, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream call failed: {0}")]
    Rpc(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            Self::NoSafeRecipes => "NO_SAFE_RECIPES",
            Self::SafetyValidationFailed(_) => "SAFETY_VALIDATION_FAILED",
            Self::OnboardingRequired { .. } => "ONBOARDING_REQUIRED",
            Self::JobFailed(_) => "JOB_FAILED",
            Self::JobTimeout(_) => "JOB_TIMEOUT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Rpc(_) | Self::Database(_) => "RPC_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::OnboardingRequired { .. } => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::NoSafeRecipes | Self::SafetyValidationFailed(_) | Self::JobFailed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::JobTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Rpc(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        let mut body = json!({ "code": self.code(), "message": self.to_string() });
        match self {
            Self::InsufficientCredits { balance, required } => {
                body["balance"] = json!(balance);
                body["required"] = json!(required);
            }
            Self::OnboardingRequired { redirect_to } => {
                body["redirect_to"] = json!(redirect_to);
            }
            Self::RateLimited { retry_after_secs } => {
                body["retry_after"] = json!(retry_after_secs);
            }
            _ => {}
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Database(e) => error!(error = %e, "database error"),
            Self::Internal(e) => error!(error = ?e, "internal error"),
            Self::Rpc(e) => error!(error = %e, "upstream error"),
            _ => {}
        }
        (status, Json(self.body())).into_response()
    }
}

impl From<ConsumeError> for AppError {
    fn from(e: ConsumeError) -> Self {
        match e {
            ConsumeError::Unauthorized => Self::unauthorized("no active session"),
            ConsumeError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            ConsumeError::Rpc(msg) => Self::Rpc(msg),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Insufficient { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            LedgerError::WalletMissing(_) => Self::NotFound("wallet"),
            LedgerError::Database(e) => Self::Database(e),
        }
    }
}

impl From<RegisterError> for AppError {
    fn from(e: RegisterError) -> Self {
        match e {
            RegisterError::EmailTaken => Self::Conflict("Email already registered".into()),
            RegisterError::Database(e) => Self::Database(e),
        }
    }
}

impl From<JobStoreError> for AppError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::KeyReused => {
                Self::Conflict("idempotency key already used for a different job kind".into())
            }
            JobStoreError::Database(e) => Self::Database(e),
        }
    }
}

impl From<PollError> for AppError {
    fn from(e: PollError) -> Self {
        match e {
            PollError::NotFound(_) => Self::NotFound("job"),
            PollError::Failed(message) => Self::JobFailed(message),
            PollError::Timeout(budget) => Self::JobTimeout(budget.as_secs()),
            PollError::Store(e) => e.into(),
        }
    }
}

impl From<AwardError> for AppError {
    fn from(e: AwardError) -> Self {
        match e {
            AwardError::Database(e) => Self::Database(e),
            AwardError::Ledger(e) => e.into(),
        }
    }
}

impl From<AiError> for AppError {
    fn from(e: AiError) -> Self {
        Self::Rpc(format!("ai gateway: {e}"))
    }
}
