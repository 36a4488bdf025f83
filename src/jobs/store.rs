use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use super::model::{AutomationJob, JobKind, JobOutcome, JobStatus, NewJob};
use crate::credits::Debit;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("idempotency key already used for another job kind")]
    KeyReused,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a queued job, or return the job already holding the key.
    /// The flag is true when a new row was created.
    async fn enqueue(&self, job: &NewJob) -> Result<(AutomationJob, bool), JobStoreError>;

    async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Option<AutomationJob>, JobStoreError>;

    async fn find_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<AutomationJob>, JobStoreError>;

    /// Move the oldest queued job to running; concurrent workers never claim the same row.
    async fn claim_next(&self) -> Result<Option<AutomationJob>, JobStoreError>;

    async fn finish(&self, id: Uuid, outcome: &JobOutcome) -> Result<(), JobStoreError>;

    async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>, JobStoreError>;
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    status: String,
    payload: Value,
    result: Option<Value>,
    error: Option<String>,
    idempotency_key: String,
    charged_subscription: i64,
    charged_lifetime: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<JobRow> for AutomationJob {
    type Error = sqlx::Error;

    fn try_from(r: JobRow) -> Result<Self, Self::Error> {
        let kind = JobKind::from_db(&r.kind)
            .ok_or_else(|| sqlx::Error::Decode(format!("unknown job kind {}", r.kind).into()))?;
        Ok(AutomationJob {
            id: r.id,
            user_id: r.user_id,
            kind,
            status: JobStatus::from_db(&r.status),
            payload: r.payload,
            result: r.result,
            error: r.error,
            idempotency_key: r.idempotency_key,
            charged: Debit {
                subscription: r.charged_subscription,
                lifetime: r.charged_lifetime,
            },
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

const JOB_COLUMNS: &str = "id, user_id, kind, status, payload, result, error, idempotency_key, \
                           charged_subscription, charged_lifetime, created_at, updated_at";

#[derive(Clone)]
pub struct PgJobStore {
    db: PgPool,
}

impl PgJobStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn convert(row: Option<JobRow>) -> Result<Option<AutomationJob>, JobStoreError> {
    Ok(row.map(AutomationJob::try_from).transpose()?)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: &NewJob) -> Result<(AutomationJob, bool), JobStoreError> {
        let inserted = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO automation_jobs
                   (id, user_id, kind, status, payload, idempotency_key,
                    charged_subscription, charged_lifetime)
            VALUES ($1, $2, $3, 'queued', $4, $5, $6, $7)
            ON CONFLICT (user_id, idempotency_key) DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(job.user_id)
        .bind(job.kind.as_str())
        .bind(&job.payload)
        .bind(&job.idempotency_key)
        .bind(job.charged.subscription)
        .bind(job.charged.lifetime)
        .fetch_optional(&self.db)
        .await?;

        if let Some(job) = convert(inserted)? {
            return Ok((job, true));
        }
        let existing = self
            .find_by_key(job.user_id, &job.idempotency_key)
            .await?
            .ok_or(JobStoreError::Database(sqlx::Error::RowNotFound))?;
        if existing.kind != job.kind {
            return Err(JobStoreError::KeyReused);
        }
        Ok((existing, false))
    }

    async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Option<AutomationJob>, JobStoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM automation_jobs WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn find_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<AutomationJob>, JobStoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM automation_jobs WHERE user_id = $1 AND idempotency_key = $2"
        ))
        .bind(user_id)
        .bind(idempotency_key)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn claim_next(&self) -> Result<Option<AutomationJob>, JobStoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE automation_jobs
               SET status = 'running', attempts = attempts + 1,
                   started_at = now(), updated_at = now()
             WHERE id = (
                   SELECT id FROM automation_jobs
                    WHERE status = 'queued'
                    ORDER BY created_at
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn finish(&self, id: Uuid, outcome: &JobOutcome) -> Result<(), JobStoreError> {
        let (status, result, error) = match outcome {
            JobOutcome::Success(v) => (JobStatus::Success, Some(v), None),
            JobOutcome::Error(e) => (JobStatus::Error, None, Some(e.as_str())),
        };
        let done = sqlx::query(
            r#"
            UPDATE automation_jobs
               SET status = $2, result = $3, error = $4,
                   finished_at = now(), updated_at = now()
             WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(result)
        .bind(error)
        .execute(&self.db)
        .await?;
        if done.rows_affected() == 0 {
            warn!(job_id = %id, "finish ignored: job not running");
        }
        Ok(())
    }

    async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>, JobStoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM automation_jobs GROUP BY status ORDER BY status")
                .fetch_all(&self.db)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(s, n)| (JobStatus::from_db(&s), n))
            .collect())
    }
}
