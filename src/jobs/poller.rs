//! Wait for a job to reach a terminal state.
//!
//! Fixed interval, no backoff. Running out of budget is reported as
//! [`PollError::Timeout`], which callers must keep apart from a job that
//! finished with an error.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::{
    model::{AutomationJob, JobStatus},
    store::{JobStore, JobStoreError},
};
use crate::config::JobsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub budget: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            budget: Duration::from_secs(120),
        }
    }
}

impl From<&JobsConfig> for PollPolicy {
    fn from(cfg: &JobsConfig) -> Self {
        Self {
            interval: cfg.poll_interval(),
            budget: cfg.poll_budget(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("job failed: {0}")]
    Failed(String),
    #[error("job still pending after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

pub async fn poll_until_terminal(
    store: &dyn JobStore,
    user_id: Uuid,
    job_id: Uuid,
    policy: PollPolicy,
) -> Result<AutomationJob, PollError> {
    let deadline = Instant::now() + policy.budget;
    loop {
        let job = store
            .get(user_id, job_id)
            .await?
            .ok_or(PollError::NotFound(job_id))?;
        match job.status {
            JobStatus::Success => return Ok(job),
            JobStatus::Error => {
                return Err(PollError::Failed(
                    job.error.unwrap_or_else(|| "unknown error".into()),
                ))
            }
            JobStatus::Queued | JobStatus::Running => {}
        }
        if Instant::now() >= deadline {
            return Err(PollError::Timeout(policy.budget));
        }
        sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        credits::Debit,
        jobs::{
            model::{JobKind, JobOutcome, NewJob},
            store::memory::MemoryJobStore,
        },
    };

    async fn queued(store: &MemoryJobStore, user_id: Uuid) -> Uuid {
        let (job, _) = store
            .enqueue(&NewJob {
                user_id,
                kind: JobKind::Frigo,
                payload: json!({ "ingredients": ["leeks"] }),
                idempotency_key: Uuid::new_v4().to_string(),
                charged: Debit::default(),
            })
            .await
            .unwrap();
        job.id
    }

    #[tokio::test(start_paused = true)]
    async fn pending_job_times_out_after_budget() {
        let store = MemoryJobStore::default();
        let user = Uuid::new_v4();
        let id = queued(&store, user).await;

        let started = Instant::now();
        let err = poll_until_terminal(&store, user, id, PollPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Timeout(d) if d == Duration::from_secs(120)));
        assert!(started.elapsed() >= Duration::from_secs(120));
        assert!(started.elapsed() < Duration::from_secs(123));
    }

    #[tokio::test(start_paused = true)]
    async fn job_error_is_not_a_timeout() {
        let store = Arc::new(MemoryJobStore::default());
        let user = Uuid::new_v4();
        let id = queued(&store, user).await;

        let worker = store.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            worker.claim_next().await.unwrap();
            worker.finish(id, &JobOutcome::Error("vision model refused".into())).await.unwrap();
        });

        let started = Instant::now();
        let err = poll_until_terminal(store.as_ref(), user, id, PollPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Failed(ref m) if m == "vision model refused"));
        assert!(started.elapsed() <= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn success_returns_job() {
        let store = MemoryJobStore::default();
        let user = Uuid::new_v4();
        let id = queued(&store, user).await;
        store.claim_next().await.unwrap();
        store.finish(id, &JobOutcome::Success(json!({ "ideas": [] }))).await.unwrap();

        let job = poll_until_terminal(&store, user, id, PollPolicy::default()).await.unwrap();
        assert_eq!(job.result, Some(json!({ "ideas": [] })));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = MemoryJobStore::default();
        let err = poll_until_terminal(&store, Uuid::new_v4(), Uuid::new_v4(), PollPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::NotFound(_)));
    }
}
