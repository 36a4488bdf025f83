use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    model::{charge_key, string_list, AutomationJob, JobKind, JobOutcome},
    store::{JobStore, JobStoreError},
};
use crate::{
    ai::{AiGateway, AiTask},
    credits::{refund_charge, CreditLedger},
    storage::StorageClient,
};

/// Presigned photo URLs handed to the vision model stay valid this long.
const PHOTO_URL_TTL_SECS: u64 = 600;

/// Drains the automation queue: claim, run through the AI gateway, store
/// the outcome. A job ending in error gets its credits back once.
#[derive(Clone)]
pub struct JobWorker {
    store: Arc<dyn JobStore>,
    ai: Arc<dyn AiGateway>,
    ledger: Arc<dyn CreditLedger>,
    storage: Arc<dyn StorageClient>,
}

impl JobWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        ai: Arc<dyn AiGateway>,
        ledger: Arc<dyn CreditLedger>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self { store, ai, ledger, storage }
    }

    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                loop {
                    match self.run_once().await {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            error!(error = %e, "job worker tick failed");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Process at most one job. Returns false when the queue was empty.
    pub async fn run_once(&self) -> Result<bool, JobStoreError> {
        let Some(job) = self.store.claim_next().await? else {
            return Ok(false);
        };
        debug!(job_id = %job.id, kind = job.kind.as_str(), "job claimed");

        let outcome = match self.execute(&job).await {
            Ok(result) => JobOutcome::Success(result),
            Err(message) => JobOutcome::Error(message),
        };
        self.store.finish(job.id, &outcome).await?;

        match &outcome {
            JobOutcome::Success(_) => info!(job_id = %job.id, kind = job.kind.as_str(), "job succeeded"),
            JobOutcome::Error(message) => {
                warn!(job_id = %job.id, kind = job.kind.as_str(), error = %message, "job failed");
                let key = charge_key(&job.idempotency_key);
                if let Err(e) = refund_charge(self.ledger.as_ref(), job.user_id, &key).await {
                    error!(job_id = %job.id, error = %e, "job refund failed");
                }
            }
        }
        Ok(true)
    }

    async fn execute(&self, job: &AutomationJob) -> Result<Value, String> {
        let task = self.task_for(job).await?;
        self.ai.run(&task).await.map_err(|e| e.to_string())
    }

    async fn task_for(&self, job: &AutomationJob) -> Result<AiTask, String> {
        let restrictions = string_list(&job.payload, "restrictions");
        match job.kind {
            JobKind::Scan => {
                let key = job
                    .payload
                    .get("photo_key")
                    .and_then(Value::as_str)
                    .ok_or("payload has no photo_key")?;
                let image_url = self
                    .storage
                    .presign_get(key, PHOTO_URL_TTL_SECS)
                    .await
                    .map_err(|e| format!("photo unavailable: {e}"))?;
                Ok(AiTask::AnalyzeMealPhoto { image_url })
            }
            JobKind::Frigo => Ok(AiTask::FridgeInspiration {
                ingredients: string_list(&job.payload, "ingredients"),
                restrictions,
            }),
            JobKind::Substitution => {
                let ingredient = job
                    .payload
                    .get("ingredient")
                    .and_then(Value::as_str)
                    .ok_or("payload has no ingredient")?;
                Ok(AiTask::Substitutions {
                    ingredient: ingredient.trim().to_string(),
                    restrictions,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;
    use uuid::Uuid;

    use super::*;
    use crate::{
        ai::{fake::FakeAi, AiError},
        credits::{
            check_and_consume_credits, ledger::memory::MemoryCreditLedger, Feature, Plan, Wallet,
        },
        jobs::{
            model::{JobStatus, NewJob},
            store::memory::MemoryJobStore,
        },
        storage::memory::MemoryStorage,
    };

    struct Rig {
        store: Arc<MemoryJobStore>,
        ledger: Arc<MemoryCreditLedger>,
        user: Uuid,
    }

    fn rig() -> Rig {
        let user = Uuid::new_v4();
        let wallet = Wallet::new(user, Plan::Free, 5, datetime!(2026-01-01 00:00 UTC));
        Rig {
            store: Arc::new(MemoryJobStore::default()),
            ledger: Arc::new(MemoryCreditLedger::default().with_wallet(wallet)),
            user,
        }
    }

    fn worker(rig: &Rig, ai: FakeAi) -> JobWorker {
        JobWorker::new(
            rig.store.clone(),
            Arc::new(ai),
            rig.ledger.clone(),
            Arc::new(MemoryStorage::default()),
        )
    }

    async fn charge_and_enqueue(rig: &Rig, kind: JobKind, payload: Value) -> Uuid {
        let receipt = check_and_consume_credits(
            rig.ledger.as_ref(),
            Some(rig.user),
            kind.feature(),
            kind.feature().cost(),
            &charge_key("job-1"),
        )
        .await
        .unwrap();
        let (job, _) = rig
            .store
            .enqueue(&NewJob {
                user_id: rig.user,
                kind,
                payload,
                idempotency_key: "job-1".into(),
                charged: receipt.debited,
            })
            .await
            .unwrap();
        job.id
    }

    #[tokio::test]
    async fn empty_queue_reports_idle() {
        let rig = rig();
        assert!(!worker(&rig, FakeAi::default()).run_once().await.unwrap());
    }

    #[tokio::test]
    async fn success_stores_result() {
        let rig = rig();
        let id = charge_and_enqueue(&rig, JobKind::Frigo, json!({ "ingredients": ["leeks"] })).await;
        let ai = FakeAi::default().answer("fridge_inspiration", Ok(json!({ "ideas": [{ "title": "Soup" }] })));

        assert!(worker(&rig, ai).run_once().await.unwrap());
        let job = rig.store.get(rig.user, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.result.unwrap()["ideas"][0]["title"], "Soup");
        assert_eq!(rig.ledger.wallet(rig.user).await.unwrap().balance(), 5 - Feature::FridgeInspiration.cost());
    }

    #[tokio::test]
    async fn failure_refunds_credits_once() {
        let rig = rig();
        let id = charge_and_enqueue(&rig, JobKind::Substitution, json!({ "ingredient": "butter" })).await;
        let ai = FakeAi::default().answer("substitutions", Err(AiError::RateLimited));
        let w = worker(&rig, ai);

        assert!(w.run_once().await.unwrap());
        let job = rig.store.get(rig.user, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("rate limited"));
        assert_eq!(rig.ledger.wallet(rig.user).await.unwrap().balance(), 5);

        // the charge is void now, refunding again changes nothing
        assert!(!refund_charge(rig.ledger.as_ref(), rig.user, &charge_key("job-1")).await.unwrap());
        assert_eq!(rig.ledger.wallet(rig.user).await.unwrap().balance(), 5);
    }

    #[tokio::test]
    async fn scan_presigns_the_photo() {
        let rig = rig();
        let key = format!("scans/{}/p.jpg", rig.user);
        charge_and_enqueue(&rig, JobKind::Scan, json!({ "photo_key": key })).await;
        let ai = FakeAi::default().answer("analyze_meal_photo", Ok(json!({ "calories_kcal": 640 })));
        let w = worker(&rig, ai);

        let job = rig.store.claim_next().await.unwrap().unwrap();
        match w.task_for(&job).await.unwrap() {
            AiTask::AnalyzeMealPhoto { image_url } => assert!(image_url.ends_with(&key)),
            other => panic!("unexpected task {}", other.name()),
        }
    }
}
