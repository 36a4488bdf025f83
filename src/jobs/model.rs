use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::credits::{Debit, Feature};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Scan,
    Frigo,
    Substitution,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Scan => "scan",
            JobKind::Frigo => "frigo",
            JobKind::Substitution => "substitution",
        }
    }

    pub fn from_db(raw: &str) -> Option<Self> {
        match raw {
            "scan" => Some(JobKind::Scan),
            "frigo" => Some(JobKind::Frigo),
            "substitution" => Some(JobKind::Substitution),
            _ => None,
        }
    }

    /// Credit feature charged when a job of this kind is enqueued.
    pub fn feature(self) -> Feature {
        match self {
            JobKind::Scan => Feature::PhotoScan,
            JobKind::Frigo => Feature::FridgeInspiration,
            JobKind::Substitution => Feature::Substitution,
        }
    }

    /// Shape check done before any credit is taken.
    pub fn validate_payload(self, user_id: Uuid, payload: &Value) -> Result<(), String> {
        match self {
            JobKind::Scan => {
                let key = payload
                    .get("photo_key")
                    .and_then(Value::as_str)
                    .ok_or("photo_key is required")?;
                if !key.starts_with(&format!("scans/{user_id}/")) {
                    return Err("photo_key does not belong to the caller".into());
                }
            }
            JobKind::Frigo => {
                let ingredients = string_list(payload, "ingredients");
                if ingredients.is_empty() {
                    return Err("ingredients must be a non-empty list".into());
                }
                if ingredients.len() > 50 {
                    return Err("at most 50 ingredients".into());
                }
            }
            JobKind::Substitution => {
                let ingredient = payload
                    .get("ingredient")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or_default();
                if ingredient.is_empty() {
                    return Err("ingredient is required".into());
                }
            }
        }
        Ok(())
    }
}

/// Non-empty trimmed strings of `payload[field]`; anything else is dropped.
pub fn string_list(payload: &Value, field: &str) -> Vec<String> {
    payload
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "running" => JobStatus::Running,
            "success" => JobStatus::Success,
            "error" => JobStatus::Error,
            _ => JobStatus::Queued,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AutomationJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub payload: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub idempotency_key: String,
    pub charged: Debit,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Ledger key a job's credits are charged under.
pub fn charge_key(idempotency_key: &str) -> String {
    format!("job:{}", idempotency_key.trim())
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: Uuid,
    pub kind: JobKind,
    pub payload: Value,
    pub idempotency_key: String,
    pub charged: Debit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success(Value),
    Error(String),
}
