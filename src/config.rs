use std::{fmt::Display, str::FromStr, time::Duration};

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

/// Monthly subscription allowances per plan.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditsConfig {
    pub free_monthly: i64,
    pub premium_monthly: i64,
    pub reset_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    pub poll_interval_ms: u64,
    pub poll_budget_secs: u64,
    pub worker_interval_secs: u64,
}

impl JobsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_budget(&self) -> Duration {
        Duration::from_secs(self.poll_budget_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactConfig {
    pub n8n_webhook_url: Option<String>,
    pub rate_limit: u32,
    pub rate_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub credits: CreditsConfig,
    pub jobs: JobsConfig,
    pub contact: ContactConfig,
    pub stripe_webhook_secret: String,
    /// Treat the user as onboarded when the status lookup fails.
    pub onboarding_fail_open: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "menuzen".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "menuzen-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };
        let storage = StorageConfig {
            endpoint: std::env::var("MINIO_ENDPOINT")?,
            bucket: std::env::var("MINIO_BUCKET").unwrap_or_else(|_| "menuzen".into()),
            access_key: std::env::var("MINIO_ACCESS_KEY")?,
            secret_key: std::env::var("MINIO_SECRET_KEY")?,
        };
        let llm = LlmConfig {
            base_url: std::env::var("LLM_BASE_URL")?,
            api_key: std::env::var("LLM_API_KEY")?,
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            timeout_secs: env_or("LLM_TIMEOUT_SECS", 60),
        };
        let credits = CreditsConfig {
            free_monthly: env_or("FREE_MONTHLY_CREDITS", 5),
            premium_monthly: env_or("PREMIUM_MONTHLY_CREDITS", 40),
            reset_interval_secs: env_or("CREDIT_RESET_INTERVAL_SECS", 300),
        };
        let jobs = JobsConfig {
            poll_interval_ms: env_or("JOB_POLL_INTERVAL_MS", 2_000),
            poll_budget_secs: env_or("JOB_POLL_BUDGET_SECS", 120),
            worker_interval_secs: env_or("WORKER_INTERVAL_SECS", 2),
        };
        let contact = ContactConfig {
            n8n_webhook_url: std::env::var("N8N_WEBHOOK_URL").ok().filter(|v| !v.is_empty()),
            rate_limit: env_or("CONTACT_RATE_LIMIT", 5),
            rate_window_secs: env_or("CONTACT_RATE_WINDOW_SECS", 600),
        };

        Ok(Self {
            database_url,
            jwt,
            storage,
            llm,
            credits,
            jobs,
            contact,
            stripe_webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")?,
            onboarding_fail_open: env_or("ONBOARDING_FAIL_OPEN", true),
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset or malformed.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|e| {
            warn!(key, error = %e, "invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_on_missing_and_malformed() {
        assert_eq!(env_or::<u64>("MENUZEN_TEST_UNSET_VARIABLE", 7), 7);

        std::env::set_var("MENUZEN_TEST_BAD_NUMBER", "seven");
        assert_eq!(env_or::<u64>("MENUZEN_TEST_BAD_NUMBER", 7), 7);

        std::env::set_var("MENUZEN_TEST_GOOD_BOOL", "false");
        assert!(!env_or::<bool>("MENUZEN_TEST_GOOD_BOOL", true));
    }

    #[test]
    fn jobs_durations() {
        let jobs = JobsConfig {
            poll_interval_ms: 2_000,
            poll_budget_secs: 120,
            worker_interval_secs: 2,
        };
        assert_eq!(jobs.poll_interval(), Duration::from_secs(2));
        assert_eq!(jobs.poll_budget(), Duration::from_secs(120));
    }
}
