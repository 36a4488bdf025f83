//! Periodic subscription-credit top-ups.

use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::time::interval;
use tracing::{debug, error, info};

use super::ledger::CreditLedger;

pub struct CreditResetWorker {
    ledger: Arc<dyn CreditLedger>,
    every: Duration,
}

impl CreditResetWorker {
    pub fn spawn(ledger: Arc<dyn CreditLedger>, every: Duration) -> tokio::task::JoinHandle<()> {
        let worker = Self { ledger, every };
        tokio::spawn(async move { worker.run().await })
    }

    async fn run(&self) {
        info!(every = ?self.every, "starting credit reset worker");
        let mut ticker = interval(self.every);
        loop {
            ticker.tick().await;
            self.tick(OffsetDateTime::now_utc()).await;
        }
    }

    async fn tick(&self, now: OffsetDateTime) -> usize {
        match self.ledger.apply_due_resets(now).await {
            Ok(0) => {
                debug!("no wallet due for reset");
                0
            }
            Ok(n) => {
                info!(wallets = n, "subscription credits reset");
                n
            }
            Err(e) => {
                error!(error = %e, "credit reset failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::{ledger::memory::MemoryCreditLedger, Plan, Wallet};
    use time::macros::datetime;
    use uuid::Uuid;

    #[tokio::test]
    async fn tick_resets_only_due_wallets() {
        let due = Wallet::new(Uuid::new_v4(), Plan::Free, 5, datetime!(2026-01-01 00:00 UTC));
        let later = Wallet::new(Uuid::new_v4(), Plan::Free, 5, datetime!(2026-02-20 00:00 UTC));
        let ledger = Arc::new(MemoryCreditLedger::default().with_wallet(due).with_wallet(later));
        let worker = CreditResetWorker {
            ledger: ledger.clone(),
            every: Duration::from_secs(60),
        };
        assert_eq!(worker.tick(datetime!(2026-02-02 00:00 UTC)).await, 1);
        assert_eq!(worker.tick(datetime!(2026-02-02 00:00 UTC)).await, 0);
    }
}
