use serde::Deserialize;
use serde_json::Value;

use super::model::JobKind;

#[derive(Debug, Deserialize)]
pub struct EnqueueJobRequest {
    pub kind: JobKind,
    #[serde(default)]
    pub payload: Value,
    pub idempotency_key: String,
}
