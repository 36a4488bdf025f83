use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use time::{Date, OffsetDateTime};
use tracing::{debug, info};
use uuid::Uuid;

use super::progress::{Award, Progress};
use crate::credits::{CreditPool, GrantRequest, LedgerError, PgCreditLedger, TxKind};

#[derive(Debug, Error)]
pub enum AwardError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Serialize)]
pub struct AwardOutcome {
    /// False when the idempotency key had already been applied.
    pub applied: bool,
    pub progress: Progress,
    pub new_badges: Vec<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct GamificationEvent {
    pub id: Uuid,
    pub event_type: String,
    pub points_delta: i64,
    pub xp_delta: i64,
    pub credits_delta: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
struct ProgressRow {
    points: i64,
    xp: i64,
    level: i32,
    current_streak: i32,
    longest_streak: i32,
    last_active_on: Option<Date>,
    badges: Vec<String>,
}

impl From<ProgressRow> for Progress {
    fn from(r: ProgressRow) -> Self {
        Progress {
            points: r.points,
            xp: r.xp,
            level: r.level,
            current_streak: r.current_streak,
            longest_streak: r.longest_streak,
            last_active_on: r.last_active_on,
            badges: r.badges,
        }
    }
}

const PROGRESS_COLUMNS: &str =
    "points, xp, level, current_streak, longest_streak, last_active_on, badges";

async fn lock_progress(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<Progress, sqlx::Error> {
    sqlx::query("INSERT INTO gamification_profiles (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    let row = sqlx::query_as::<_, ProgressRow>(&format!(
        "SELECT {PROGRESS_COLUMNS} FROM gamification_profiles WHERE user_id = $1 FOR UPDATE"
    ))
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.into())
}

/// Append the event and fold it into the projection in one transaction.
/// Credits land in the lifetime pool under `reward:<key>`.
pub async fn award(db: &PgPool, user_id: Uuid, award: &Award) -> Result<AwardOutcome, AwardError> {
    let mut tx = db.begin().await?;
    let mut progress = lock_progress(&mut tx, user_id).await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO gamification_events
               (id, user_id, event_type, points_delta, xp_delta, credits_delta, idempotency_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id, idempotency_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(&award.event_type)
    .bind(award.points)
    .bind(award.xp)
    .bind(award.credits)
    .bind(&award.idempotency_key)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    if !inserted {
        tx.rollback().await?;
        debug!(%user_id, key = %award.idempotency_key, "award replayed");
        return Ok(AwardOutcome {
            applied: false,
            progress,
            new_badges: Vec::new(),
        });
    }

    let new_badges = progress.apply(award, OffsetDateTime::now_utc().date());
    sqlx::query(
        r#"
        UPDATE gamification_profiles
           SET points = $2, xp = $3, level = $4, current_streak = $5,
               longest_streak = $6, last_active_on = $7, badges = $8, updated_at = now()
         WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(progress.points)
    .bind(progress.xp)
    .bind(progress.level)
    .bind(progress.current_streak)
    .bind(progress.longest_streak)
    .bind(progress.last_active_on)
    .bind(&progress.badges)
    .execute(&mut *tx)
    .await?;

    if award.credits > 0 {
        PgCreditLedger::grant_tx(
            &mut tx,
            &GrantRequest {
                user_id,
                pool: CreditPool::Lifetime,
                amount: award.credits,
                kind: TxKind::Reward,
                idempotency_key: Some(format!("reward:{}", award.idempotency_key)),
            },
        )
        .await?;
    }
    tx.commit().await?;

    info!(%user_id, event = %award.event_type, points = award.points, xp = award.xp,
          level = progress.level, "award applied");
    Ok(AwardOutcome {
        applied: true,
        progress,
        new_badges,
    })
}

pub async fn get_progress(db: &PgPool, user_id: Uuid) -> Result<Progress, sqlx::Error> {
    let row = sqlx::query_as::<_, ProgressRow>(&format!(
        "SELECT {PROGRESS_COLUMNS} FROM gamification_profiles WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(row.map(Into::into).unwrap_or(Progress {
        level: 1,
        ..Progress::default()
    }))
}

pub async fn recent_events(
    db: &PgPool,
    user_id: Uuid,
    limit: i64,
) -> Result<Vec<GamificationEvent>, sqlx::Error> {
    sqlx::query_as::<_, GamificationEvent>(
        r#"
        SELECT id, event_type, points_delta, xp_delta, credits_delta, created_at
          FROM gamification_events
         WHERE user_id = $1
         ORDER BY created_at DESC
         LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(db)
    .await
}
