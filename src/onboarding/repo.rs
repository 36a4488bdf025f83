use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

/// Household profile. Legacy `onboarding_status`/`onboarding_step` columns
/// are written alongside `onboarding_completed_at` but never read back.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Profile {
    pub user_id: Uuid,
    pub adults: i32,
    pub children: i32,
    pub dietary_restrictions: Vec<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub onboarding_completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct HouseholdUpdate {
    pub adults: i32,
    pub children: i32,
    pub dietary_restrictions: Vec<String>,
    pub onboarding_step: Option<i32>,
}

pub const FINAL_ONBOARDING_STEP: i32 = 4;

pub async fn create_profile_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO profiles (user_id, onboarding_status, onboarding_step)
        VALUES ($1, 'pending', 0)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn get_profile(db: &PgPool, user_id: Uuid) -> Result<Option<Profile>, sqlx::Error> {
    sqlx::query_as::<_, Profile>(
        r#"
        SELECT user_id, adults, children, dietary_restrictions, onboarding_completed_at, updated_at
          FROM profiles
         WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
}

/// `None` both when the row is missing and when onboarding is incomplete.
pub async fn completed_at(db: &PgPool, user_id: Uuid) -> Result<Option<OffsetDateTime>, sqlx::Error> {
    let row: Option<(Option<OffsetDateTime>,)> =
        sqlx::query_as("SELECT onboarding_completed_at FROM profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(db)
            .await?;
    Ok(row.and_then(|r| r.0))
}

pub async fn update_household(
    db: &PgPool,
    user_id: Uuid,
    update: &HouseholdUpdate,
) -> Result<Option<Profile>, sqlx::Error> {
    sqlx::query_as::<_, Profile>(
        r#"
        UPDATE profiles
           SET adults = $2,
               children = $3,
               dietary_restrictions = $4,
               onboarding_step = COALESCE($5, onboarding_step),
               onboarding_status = CASE
                   WHEN onboarding_completed_at IS NULL THEN 'in_progress'
                   ELSE onboarding_status
               END,
               updated_at = now()
         WHERE user_id = $1
        RETURNING user_id, adults, children, dietary_restrictions, onboarding_completed_at, updated_at
        "#,
    )
    .bind(user_id)
    .bind(update.adults)
    .bind(update.children)
    .bind(&update.dietary_restrictions)
    .bind(update.onboarding_step)
    .fetch_optional(db)
    .await
}

/// Mark onboarding complete; the canonical timestamp and the legacy fields
/// change in one statement. Returns the timestamp and whether this call set it.
pub async fn complete(
    db: &PgPool,
    user_id: Uuid,
) -> Result<Option<(OffsetDateTime, bool)>, sqlx::Error> {
    let row: Option<(OffsetDateTime, bool)> = sqlx::query_as(
        r#"
        UPDATE profiles p
           SET onboarding_completed_at = COALESCE(p.onboarding_completed_at, now()),
               onboarding_status = 'completed',
               onboarding_step = $2,
               updated_at = now()
          FROM (SELECT onboarding_completed_at IS NULL AS was_pending
                  FROM profiles WHERE user_id = $1 FOR UPDATE) prev
         WHERE p.user_id = $1
        RETURNING p.onboarding_completed_at, prev.was_pending
        "#,
    )
    .bind(user_id)
    .bind(FINAL_ONBOARDING_STEP)
    .fetch_optional(db)
    .await?;
    Ok(row)
}
