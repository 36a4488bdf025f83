//! Lead fan-out to the n8n webhook.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeadKind {
    #[default]
    General,
    Support,
    Partnership,
    Press,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Lead {
    pub name: String,
    pub email: String,
    pub message: String,
    pub kind: LeadKind,
    pub client: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("webhook answered {0}")]
    Http(u16),
}

#[async_trait]
pub trait LeadNotifier: Send + Sync {
    async fn notify(&self, lead: &Lead) -> Result<(), NotifyError>;
}

/// Posts leads to n8n. Without a configured URL leads are only logged.
#[derive(Debug, Clone)]
pub struct N8nNotifier {
    http: Client,
    url: Option<String>,
}

impl N8nNotifier {
    pub fn new(url: Option<String>) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl LeadNotifier for N8nNotifier {
    async fn notify(&self, lead: &Lead) -> Result<(), NotifyError> {
        let Some(url) = self.url.as_deref() else {
            info!(kind = ?lead.kind, "n8n webhook not configured, lead logged only");
            return Ok(());
        };
        let res = self
            .http
            .post(url)
            .json(lead)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        if !res.status().is_success() {
            return Err(NotifyError::Http(res.status().as_u16()));
        }
        debug!(kind = ?lead.kind, "lead forwarded");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_notifier_is_a_noop() {
        let notifier = N8nNotifier::new(None).unwrap();
        let lead = Lead {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            message: "Hello".into(),
            kind: LeadKind::General,
            client: "127.0.0.1".into(),
            received_at: OffsetDateTime::now_utc(),
        };
        assert!(notifier.notify(&lead).await.is_ok());
    }
}
