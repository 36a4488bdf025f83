use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    credits::{PgCreditLedger, Plan, Wallet},
    onboarding::repo as profiles,
};

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    pub is_admin: bool,
    pub subscription_status: String,
    pub created_at: OffsetDateTime,
}

const USER_COLUMNS: &str = "id, email, password_hash, is_admin, subscription_status, created_at";

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("email already registered")]
    EmailTaken,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

const UNIQUE_VIOLATION: &str = "23505";

fn is_unique_violation(code: Option<&str>) -> bool {
    code == Some(UNIQUE_VIOLATION)
}

impl RegisterError {
    /// A concurrent registration that won the race surfaces as a unique violation.
    fn from_insert(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if is_unique_violation(db.code().as_deref()) => Self::EmailTaken,
            _ => Self::Database(e),
        }
    }
}

/// Stripe statuses that grant the premium allowance.
pub fn is_premium_status(status: &str) -> bool {
    matches!(status, "active" | "trialing")
}

impl User {
    /// Find a user by email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Create the user together with an empty profile and a free wallet.
    pub async fn register(
        db: &PgPool,
        email: &str,
        password_hash: &str,
        free_allowance: i64,
    ) -> Result<User, RegisterError> {
        let mut tx = db.begin().await?;
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, password_hash)
            VALUES ($1, $2)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(RegisterError::from_insert)?;

        profiles::create_profile_tx(&mut tx, user.id).await?;
        let wallet = Wallet::new(user.id, Plan::Free, free_allowance, OffsetDateTime::now_utc());
        PgCreditLedger::create_wallet_tx(&mut tx, &wallet).await?;
        tx.commit().await?;
        Ok(user)
    }

    pub async fn is_admin(db: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT is_admin FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(db)
            .await?;
        Ok(row.map(|r| r.0).unwrap_or(false))
    }

    pub async fn set_admin(db: &PgPool, id: Uuid, is_admin: bool) -> Result<bool, sqlx::Error> {
        let res = sqlx::query("UPDATE users SET is_admin = $2 WHERE id = $1")
            .bind(id)
            .bind(is_admin)
            .execute(db)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn set_subscription_status(
        db: &PgPool,
        id: Uuid,
        status: &str,
    ) -> Result<bool, sqlx::Error> {
        let res = sqlx::query("UPDATE users SET subscription_status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(db)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn list(db: &PgPool, limit: i64, offset: i64) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premium_statuses() {
        assert!(is_premium_status("active"));
        assert!(is_premium_status("trialing"));
        assert!(!is_premium_status("past_due"));
        assert!(!is_premium_status("canceled"));
        assert!(!is_premium_status("none"));
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            email: "cook@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            is_admin: false,
            subscription_status: "none".into(),
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
    }

    #[test]
    fn only_unique_violations_mean_taken() {
        assert!(is_unique_violation(Some("23505")));
        assert!(!is_unique_violation(Some("23503")));
        assert!(!is_unique_violation(None));
        assert!(matches!(
            RegisterError::from_insert(sqlx::Error::PoolTimedOut),
            RegisterError::Database(_)
        ));
    }

    #[test]
    fn taken_email_is_a_conflict() {
        let err = crate::error::AppError::from(RegisterError::EmailTaken);
        assert_eq!(err.code(), "CONFLICT");
    }
}
