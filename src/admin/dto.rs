use serde::{Deserialize, Serialize};

use crate::{credits::CreditPool, jobs::JobStatus};

#[derive(Debug, Deserialize)]
pub struct SetAdminRequest {
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    pub amount: i64,
    #[serde(default = "default_pool")]
    pub pool: CreditPool,
    pub idempotency_key: String,
}

fn default_pool() -> CreditPool {
    CreditPool::Lifetime
}

#[derive(Debug, Serialize)]
pub struct JobCount {
    pub status: JobStatus,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct DiagnosticsResponse {
    pub database_ok: bool,
    pub database_latency_ms: Option<u128>,
    pub jobs: Vec<JobCount>,
    pub wallets_due_for_reset: i64,
    pub admin_checks_in_flight: usize,
}
