use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use super::wallet::{CreditPool, Debit, Feature, Plan, ResetCadence, ResetOutcome, Wallet};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient credits: balance {balance}, required {required}")]
    Insufficient { balance: i64, required: i64 },
    #[error("no wallet for user {0}")]
    WalletMissing(Uuid),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Consume,
    Grant,
    Purchase,
    Reward,
    Refund,
    Reset,
}

impl TxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::Consume => "consume",
            TxKind::Grant => "grant",
            TxKind::Purchase => "purchase",
            TxKind::Reward => "reward",
            TxKind::Refund => "refund",
            TxKind::Reset => "reset",
        }
    }

    fn from_db(raw: &str) -> Self {
        match raw {
            "consume" => TxKind::Consume,
            "purchase" => TxKind::Purchase,
            "reward" => TxKind::Reward,
            "refund" => TxKind::Refund,
            "reset" => TxKind::Reset,
            _ => TxKind::Grant,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub user_id: Uuid,
    pub feature: Feature,
    pub cost: i64,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConsumeReceipt {
    pub transaction_id: Uuid,
    pub feature: Feature,
    pub debited: Debit,
    pub balance_after: i64,
    /// True when the idempotency key had already been applied.
    pub replayed: bool,
}

#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub user_id: Uuid,
    pub pool: CreditPool,
    pub amount: i64,
    pub kind: TxKind,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub kind: TxKind,
    pub feature: Option<Feature>,
    pub subscription_delta: i64,
    pub lifetime_delta: i64,
    pub balance_after: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Atomic wallet operations. Callers never read-modify-write balances themselves.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn wallet(&self, user_id: Uuid) -> Result<Wallet, LedgerError>;

    /// Check sufficiency and debit in one step; a replayed key returns the original receipt.
    /// A key whose charge was refunded is charged again.
    async fn check_and_consume(&self, req: &ConsumeRequest) -> Result<ConsumeReceipt, LedgerError>;

    /// Give a live charge back to the pools it came from and void it.
    /// Returns `None` when nothing live is recorded under the key.
    async fn refund(&self, user_id: Uuid, charge_key: &str) -> Result<Option<Wallet>, LedgerError>;

    /// Add credits to a pool; a replayed key leaves the wallet untouched.
    async fn grant(&self, req: &GrantRequest) -> Result<Wallet, LedgerError>;

    /// Switch plan. A key already applied leaves the wallet untouched.
    async fn change_plan(
        &self,
        user_id: Uuid,
        plan: Plan,
        allowance: i64,
        idempotency_key: Option<&str>,
    ) -> Result<Wallet, LedgerError>;

    async fn apply_reset(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<ResetOutcome>, LedgerError>;

    /// Reset every due wallet; returns how many were reset.
    async fn apply_due_resets(&self, now: OffsetDateTime) -> Result<usize, LedgerError>;

    async fn transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CreditTransaction>, LedgerError>;
}

#[derive(Debug, FromRow)]
struct WalletRow {
    user_id: Uuid,
    plan: String,
    subscription_credits: i64,
    lifetime_credits: i64,
    cycle_allowance: i64,
    reset_cadence: String,
    next_reset_at: OffsetDateTime,
}

impl From<WalletRow> for Wallet {
    fn from(r: WalletRow) -> Self {
        Self {
            user_id: r.user_id,
            plan: Plan::from_db(&r.plan),
            subscription_credits: r.subscription_credits,
            lifetime_credits: r.lifetime_credits,
            cycle_allowance: r.cycle_allowance,
            reset_cadence: ResetCadence::from_db(&r.reset_cadence),
            next_reset_at: r.next_reset_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    kind: String,
    feature: Option<String>,
    subscription_delta: i64,
    lifetime_delta: i64,
    balance_after: i64,
    created_at: OffsetDateTime,
}

impl From<TransactionRow> for CreditTransaction {
    fn from(r: TransactionRow) -> Self {
        Self {
            id: r.id,
            kind: TxKind::from_db(&r.kind),
            feature: r.feature.as_deref().and_then(Feature::from_db),
            subscription_delta: r.subscription_delta,
            lifetime_delta: r.lifetime_delta,
            balance_after: r.balance_after,
            created_at: r.created_at,
        }
    }
}

const WALLET_COLUMNS: &str = "user_id, plan, subscription_credits, lifetime_credits, \
                              cycle_allowance, reset_cadence, next_reset_at";

/// Postgres ledger: every mutation is one transaction holding the wallet row lock.
#[derive(Clone)]
pub struct PgCreditLedger {
    db: PgPool,
}

impl PgCreditLedger {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn create_wallet_tx(
        tx: &mut Transaction<'_, Postgres>,
        wallet: &Wallet,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO wallets (user_id, plan, subscription_credits, lifetime_credits,
                                 cycle_allowance, reset_cadence, next_reset_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(wallet.user_id)
        .bind(wallet.plan.as_str())
        .bind(wallet.subscription_credits)
        .bind(wallet.lifetime_credits)
        .bind(wallet.cycle_allowance)
        .bind(wallet.reset_cadence.as_str())
        .bind(wallet.next_reset_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Credit a pool inside the caller's transaction. A key already present
    /// in the ledger leaves the wallet untouched.
    pub async fn grant_tx(
        tx: &mut Transaction<'_, Postgres>,
        req: &GrantRequest,
    ) -> Result<Wallet, LedgerError> {
        let mut wallet = Self::lock_wallet(tx, req.user_id).await?;

        if let Some(key) = req.idempotency_key.as_deref() {
            if Self::find_by_key(tx, req.user_id, key).await?.is_some() {
                debug!(user_id = %req.user_id, key, "grant replayed");
                return Ok(wallet);
            }
        }

        wallet.credit(req.pool, req.amount);
        Self::store_wallet(tx, &wallet).await?;
        let (sub, life) = match req.pool {
            CreditPool::Subscription => (req.amount, 0),
            CreditPool::Lifetime => (0, req.amount),
        };
        Self::record_tx(
            tx,
            req.user_id,
            req.kind,
            None,
            sub,
            life,
            wallet.balance(),
            req.idempotency_key.as_deref(),
        )
        .await?;

        info!(user_id = %req.user_id, amount = req.amount, kind = req.kind.as_str(), "credits granted");
        Ok(wallet)
    }

    async fn lock_wallet(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<Wallet, LedgerError> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(LedgerError::WalletMissing(user_id))?;
        Ok(row.into())
    }

    async fn store_wallet(
        tx: &mut Transaction<'_, Postgres>,
        wallet: &Wallet,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE wallets
               SET plan = $2,
                   subscription_credits = $3,
                   lifetime_credits = $4,
                   cycle_allowance = $5,
                   next_reset_at = $6,
                   updated_at = now()
             WHERE user_id = $1
            "#,
        )
        .bind(wallet.user_id)
        .bind(wallet.plan.as_str())
        .bind(wallet.subscription_credits)
        .bind(wallet.lifetime_credits)
        .bind(wallet.cycle_allowance)
        .bind(wallet.next_reset_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        kind: TxKind,
        feature: Option<Feature>,
        subscription_delta: i64,
        lifetime_delta: i64,
        balance_after: i64,
        idempotency_key: Option<&str>,
    ) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO credit_transactions
                (id, user_id, kind, feature, subscription_delta, lifetime_delta,
                 balance_after, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(kind.as_str())
        .bind(feature.map(Feature::as_str))
        .bind(subscription_delta)
        .bind(lifetime_delta)
        .bind(balance_after)
        .bind(idempotency_key)
        .execute(&mut **tx)
        .await?;
        Ok(id)
    }

    async fn find_by_key(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<TransactionRow>, sqlx::Error> {
        sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, kind, feature, subscription_delta, lifetime_delta, balance_after, created_at
              FROM credit_transactions
             WHERE user_id = $1 AND idempotency_key = $2 AND voided_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
    }

    async fn reset_locked(
        tx: &mut Transaction<'_, Postgres>,
        mut wallet: Wallet,
        now: OffsetDateTime,
    ) -> Result<Option<ResetOutcome>, LedgerError> {
        let Some(outcome) = wallet.apply_reset(now) else {
            return Ok(None);
        };
        Self::store_wallet(tx, &wallet).await?;
        Self::record_tx(
            tx,
            wallet.user_id,
            TxKind::Reset,
            None,
            outcome.subscription_credits - outcome.previous_subscription,
            0,
            wallet.balance(),
            None,
        )
        .await?;
        Ok(Some(outcome))
    }
}

#[async_trait]
impl CreditLedger for PgCreditLedger {
    async fn wallet(&self, user_id: Uuid) -> Result<Wallet, LedgerError> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(LedgerError::WalletMissing(user_id))?;
        Ok(row.into())
    }

    async fn check_and_consume(&self, req: &ConsumeRequest) -> Result<ConsumeReceipt, LedgerError> {
        let mut tx = self.db.begin().await?;
        // Lock first so a concurrent retry with the same key sees the committed row.
        let mut wallet = Self::lock_wallet(&mut tx, req.user_id).await?;

        if let Some(prev) = Self::find_by_key(&mut tx, req.user_id, &req.idempotency_key).await? {
            tx.rollback().await?;
            debug!(user_id = %req.user_id, key = %req.idempotency_key, "consume replayed");
            return Ok(ConsumeReceipt {
                transaction_id: prev.id,
                feature: prev.feature.as_deref().and_then(Feature::from_db).unwrap_or(req.feature),
                debited: Debit {
                    subscription: -prev.subscription_delta,
                    lifetime: -prev.lifetime_delta,
                },
                balance_after: prev.balance_after,
                replayed: true,
            });
        }

        let debit = wallet
            .plan_debit(req.cost)
            .map_err(|e| LedgerError::Insufficient {
                balance: e.balance,
                required: e.required,
            })?;
        wallet.apply_debit(debit);
        Self::store_wallet(&mut tx, &wallet).await?;
        let transaction_id = Self::record_tx(
            &mut tx,
            req.user_id,
            TxKind::Consume,
            Some(req.feature),
            -debit.subscription,
            -debit.lifetime,
            wallet.balance(),
            Some(&req.idempotency_key),
        )
        .await?;
        tx.commit().await?;

        info!(user_id = %req.user_id, feature = req.feature.as_str(), cost = req.cost,
              balance = wallet.balance(), "credits consumed");
        Ok(ConsumeReceipt {
            transaction_id,
            feature: req.feature,
            debited: debit,
            balance_after: wallet.balance(),
            replayed: false,
        })
    }

    async fn grant(&self, req: &GrantRequest) -> Result<Wallet, LedgerError> {
        let mut tx = self.db.begin().await?;
        let wallet = Self::grant_tx(&mut tx, req).await?;
        tx.commit().await?;
        Ok(wallet)
    }

    async fn refund(&self, user_id: Uuid, charge_key: &str) -> Result<Option<Wallet>, LedgerError> {
        let mut tx = self.db.begin().await?;
        let mut wallet = Self::lock_wallet(&mut tx, user_id).await?;
        let charge = match Self::find_by_key(&mut tx, user_id, charge_key).await? {
            Some(row) if TxKind::from_db(&row.kind) == TxKind::Consume => row,
            _ => {
                tx.rollback().await?;
                debug!(%user_id, key = charge_key, "nothing live to refund");
                return Ok(None);
            }
        };

        sqlx::query("UPDATE credit_transactions SET voided_at = now() WHERE id = $1")
            .bind(charge.id)
            .execute(&mut *tx)
            .await?;
        let (sub, life) = (-charge.subscription_delta, -charge.lifetime_delta);
        wallet.credit(CreditPool::Subscription, sub);
        wallet.credit(CreditPool::Lifetime, life);
        Self::store_wallet(&mut tx, &wallet).await?;
        Self::record_tx(
            &mut tx,
            user_id,
            TxKind::Refund,
            charge.feature.as_deref().and_then(Feature::from_db),
            sub,
            life,
            wallet.balance(),
            Some(&format!("refund:{}", charge.id)),
        )
        .await?;
        tx.commit().await?;

        info!(%user_id, key = charge_key, amount = sub + life, "charge refunded");
        Ok(Some(wallet))
    }

    async fn change_plan(
        &self,
        user_id: Uuid,
        plan: Plan,
        allowance: i64,
        idempotency_key: Option<&str>,
    ) -> Result<Wallet, LedgerError> {
        let mut tx = self.db.begin().await?;
        let mut wallet = Self::lock_wallet(&mut tx, user_id).await?;
        if let Some(key) = idempotency_key {
            if Self::find_by_key(&mut tx, user_id, key).await?.is_some() {
                tx.rollback().await?;
                debug!(%user_id, key, "plan change replayed");
                return Ok(wallet);
            }
        }
        let before = wallet.subscription_credits;
        wallet.change_plan(plan, allowance);
        Self::store_wallet(&mut tx, &wallet).await?;
        if wallet.subscription_credits != before || idempotency_key.is_some() {
            Self::record_tx(
                &mut tx,
                user_id,
                TxKind::Grant,
                None,
                wallet.subscription_credits - before,
                0,
                wallet.balance(),
                idempotency_key,
            )
            .await?;
        }
        tx.commit().await?;
        info!(%user_id, plan = plan.as_str(), allowance, "plan changed");
        Ok(wallet)
    }

    async fn apply_reset(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<ResetOutcome>, LedgerError> {
        let mut tx = self.db.begin().await?;
        let wallet = Self::lock_wallet(&mut tx, user_id).await?;
        let outcome = Self::reset_locked(&mut tx, wallet, now).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn apply_due_resets(&self, now: OffsetDateTime) -> Result<usize, LedgerError> {
        let mut tx = self.db.begin().await?;
        let due = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE next_reset_at <= $1 \
             ORDER BY next_reset_at LIMIT 500 FOR UPDATE SKIP LOCKED"
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut count = 0;
        for row in due {
            if Self::reset_locked(&mut tx, row.into(), now).await?.is_some() {
                count += 1;
            }
        }
        tx.commit().await?;
        Ok(count)
    }

    async fn transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CreditTransaction>, LedgerError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, kind, feature, subscription_delta, lifetime_delta, balance_after, created_at
              FROM credit_transactions
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
pub mod memory {
    //! In-process ledger used by handler tests.

    use std::{
        collections::{HashMap, HashSet},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use super::*;

    #[derive(Default)]
    pub struct MemoryCreditLedger {
        wallets: Mutex<HashMap<Uuid, Wallet>>,
        /// Live charges by key; a refund removes the entry.
        receipts: Mutex<HashMap<(Uuid, String), ConsumeReceipt>>,
        applied: Mutex<HashSet<(Uuid, String)>>,
        history: Mutex<Vec<(Uuid, CreditTransaction)>>,
        pub consume_calls: AtomicUsize,
    }

    impl MemoryCreditLedger {
        pub fn with_wallet(self, wallet: Wallet) -> Self {
            self.wallets.lock().unwrap().insert(wallet.user_id, wallet);
            self
        }

        pub fn consume_calls(&self) -> usize {
            self.consume_calls.load(Ordering::SeqCst)
        }

        pub fn wallet_balance(&self, user_id: Uuid) -> i64 {
            self.wallets
                .lock()
                .unwrap()
                .get(&user_id)
                .map_or(0, Wallet::balance)
        }

        fn record(
            &self,
            user_id: Uuid,
            kind: TxKind,
            feature: Option<Feature>,
            subscription_delta: i64,
            lifetime_delta: i64,
            balance_after: i64,
        ) -> Uuid {
            let id = Uuid::new_v4();
            self.history.lock().unwrap().push((
                user_id,
                CreditTransaction {
                    id,
                    kind,
                    feature,
                    subscription_delta,
                    lifetime_delta,
                    balance_after,
                    created_at: OffsetDateTime::now_utc(),
                },
            ));
            id
        }

        /// Marks the key applied; false when it already was.
        fn first_use(&self, user_id: Uuid, key: Option<&str>) -> bool {
            match key {
                Some(key) => self.applied.lock().unwrap().insert((user_id, key.to_string())),
                None => true,
            }
        }
    }

    #[async_trait]
    impl CreditLedger for MemoryCreditLedger {
        async fn wallet(&self, user_id: Uuid) -> Result<Wallet, LedgerError> {
            self.wallets
                .lock()
                .unwrap()
                .get(&user_id)
                .cloned()
                .ok_or(LedgerError::WalletMissing(user_id))
        }

        async fn check_and_consume(&self, req: &ConsumeRequest) -> Result<ConsumeReceipt, LedgerError> {
            self.consume_calls.fetch_add(1, Ordering::SeqCst);
            let mut wallets = self.wallets.lock().unwrap();
            let key = (req.user_id, req.idempotency_key.clone());
            let mut receipts = self.receipts.lock().unwrap();
            if let Some(prev) = receipts.get(&key) {
                return Ok(ConsumeReceipt { replayed: true, ..prev.clone() });
            }
            let wallet = wallets
                .get_mut(&req.user_id)
                .ok_or(LedgerError::WalletMissing(req.user_id))?;
            let debit = wallet.plan_debit(req.cost).map_err(|e| LedgerError::Insufficient {
                balance: e.balance,
                required: e.required,
            })?;
            wallet.apply_debit(debit);
            let transaction_id = self.record(
                req.user_id,
                TxKind::Consume,
                Some(req.feature),
                -debit.subscription,
                -debit.lifetime,
                wallet.balance(),
            );
            let receipt = ConsumeReceipt {
                transaction_id,
                feature: req.feature,
                debited: debit,
                balance_after: wallet.balance(),
                replayed: false,
            };
            receipts.insert(key, receipt.clone());
            Ok(receipt)
        }

        async fn refund(&self, user_id: Uuid, charge_key: &str) -> Result<Option<Wallet>, LedgerError> {
            let mut wallets = self.wallets.lock().unwrap();
            let wallet = wallets.get_mut(&user_id).ok_or(LedgerError::WalletMissing(user_id))?;
            let Some(charge) = self
                .receipts
                .lock()
                .unwrap()
                .remove(&(user_id, charge_key.to_string()))
            else {
                return Ok(None);
            };
            wallet.credit(CreditPool::Subscription, charge.debited.subscription);
            wallet.credit(CreditPool::Lifetime, charge.debited.lifetime);
            self.record(
                user_id,
                TxKind::Refund,
                Some(charge.feature),
                charge.debited.subscription,
                charge.debited.lifetime,
                wallet.balance(),
            );
            Ok(Some(wallet.clone()))
        }

        async fn grant(&self, req: &GrantRequest) -> Result<Wallet, LedgerError> {
            let mut wallets = self.wallets.lock().unwrap();
            let wallet = wallets
                .get_mut(&req.user_id)
                .ok_or(LedgerError::WalletMissing(req.user_id))?;
            if !self.first_use(req.user_id, req.idempotency_key.as_deref()) {
                return Ok(wallet.clone());
            }
            wallet.credit(req.pool, req.amount);
            let (sub, life) = match req.pool {
                CreditPool::Subscription => (req.amount, 0),
                CreditPool::Lifetime => (0, req.amount),
            };
            self.record(req.user_id, req.kind, None, sub, life, wallet.balance());
            Ok(wallet.clone())
        }

        async fn change_plan(
            &self,
            user_id: Uuid,
            plan: Plan,
            allowance: i64,
            idempotency_key: Option<&str>,
        ) -> Result<Wallet, LedgerError> {
            let mut wallets = self.wallets.lock().unwrap();
            let wallet = wallets.get_mut(&user_id).ok_or(LedgerError::WalletMissing(user_id))?;
            if !self.first_use(user_id, idempotency_key) {
                return Ok(wallet.clone());
            }
            let before = wallet.subscription_credits;
            wallet.change_plan(plan, allowance);
            if wallet.subscription_credits != before {
                self.record(
                    user_id,
                    TxKind::Grant,
                    None,
                    wallet.subscription_credits - before,
                    0,
                    wallet.balance(),
                );
            }
            Ok(wallet.clone())
        }

        async fn apply_reset(
            &self,
            user_id: Uuid,
            now: OffsetDateTime,
        ) -> Result<Option<ResetOutcome>, LedgerError> {
            let mut wallets = self.wallets.lock().unwrap();
            let wallet = wallets.get_mut(&user_id).ok_or(LedgerError::WalletMissing(user_id))?;
            Ok(wallet.apply_reset(now))
        }

        async fn apply_due_resets(&self, now: OffsetDateTime) -> Result<usize, LedgerError> {
            let mut wallets = self.wallets.lock().unwrap();
            Ok(wallets.values_mut().filter_map(|w| w.apply_reset(now)).count())
        }

        async fn transactions(
            &self,
            user_id: Uuid,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<CreditTransaction>, LedgerError> {
            let history = self.history.lock().unwrap();
            Ok(history
                .iter()
                .rev()
                .filter(|(owner, _)| *owner == user_id)
                .map(|(_, tx)| tx.clone())
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryCreditLedger;
    use super::*;
    use time::macros::datetime;

    fn ledger_with(user_id: Uuid, subscription: i64, lifetime: i64) -> MemoryCreditLedger {
        let mut wallet = Wallet::new(user_id, Plan::Free, 5, datetime!(2026-01-01 00:00 UTC));
        wallet.subscription_credits = subscription;
        wallet.lifetime_credits = lifetime;
        MemoryCreditLedger::default().with_wallet(wallet)
    }

    #[tokio::test]
    async fn replayed_key_debits_once() {
        let user_id = Uuid::new_v4();
        let ledger = ledger_with(user_id, 3, 0);
        let req = ConsumeRequest {
            user_id,
            feature: Feature::PhotoScan,
            cost: 2,
            idempotency_key: "scan-1".into(),
        };
        let first = ledger.check_and_consume(&req).await.unwrap();
        let second = ledger.check_and_consume(&req).await.unwrap();
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(second.transaction_id, first.transaction_id);
        assert_eq!(ledger.wallet(user_id).await.unwrap().balance(), 1);
    }

    #[tokio::test]
    async fn grant_with_key_applies_once() {
        let user_id = Uuid::new_v4();
        let ledger = ledger_with(user_id, 0, 0);
        let req = GrantRequest {
            user_id,
            pool: CreditPool::Lifetime,
            amount: 10,
            kind: TxKind::Purchase,
            idempotency_key: Some("evt_1".into()),
        };
        ledger.grant(&req).await.unwrap();
        let wallet = ledger.grant(&req).await.unwrap();
        assert_eq!(wallet.lifetime_credits, 10);
    }

    #[tokio::test]
    async fn refunded_charge_is_charged_again_and_refunded_once() {
        let user_id = Uuid::new_v4();
        let ledger = ledger_with(user_id, 5, 0);
        let req = ConsumeRequest {
            user_id,
            feature: Feature::FridgeInspiration,
            cost: 2,
            idempotency_key: "job:k".into(),
        };
        ledger.check_and_consume(&req).await.unwrap();
        assert!(ledger.refund(user_id, "job:k").await.unwrap().is_some());
        assert_eq!(ledger.wallet_balance(user_id), 5);

        // the refund voided the first charge, so the retry pays again
        let retry = ledger.check_and_consume(&req).await.unwrap();
        assert!(!retry.replayed);
        assert_eq!(ledger.wallet_balance(user_id), 3);

        ledger.refund(user_id, "job:k").await.unwrap();
        assert!(ledger.refund(user_id, "job:k").await.unwrap().is_none());
        assert_eq!(ledger.wallet_balance(user_id), 5);
    }

    #[tokio::test]
    async fn refund_without_charge_is_a_noop() {
        let user_id = Uuid::new_v4();
        let ledger = ledger_with(user_id, 2, 1);
        assert!(ledger.refund(user_id, "swap:nothing").await.unwrap().is_none());
        assert_eq!(ledger.wallet_balance(user_id), 3);
    }

    #[tokio::test]
    async fn repeated_plan_event_does_not_top_up() {
        let user_id = Uuid::new_v4();
        let ledger = ledger_with(user_id, 5, 0);
        ledger
            .change_plan(user_id, Plan::Premium, 40, Some("stripe:evt_1"))
            .await
            .unwrap();
        assert_eq!(ledger.wallet_balance(user_id), 40);

        let spend = ConsumeRequest {
            user_id,
            feature: Feature::MenuSwap,
            cost: 30,
            idempotency_key: "swap:big".into(),
        };
        ledger.check_and_consume(&spend).await.unwrap();
        ledger
            .change_plan(user_id, Plan::Premium, 40, Some("stripe:evt_1"))
            .await
            .unwrap();
        ledger
            .change_plan(user_id, Plan::Premium, 40, Some("stripe:evt_2"))
            .await
            .unwrap();
        assert_eq!(ledger.wallet_balance(user_id), 10);
    }

    #[tokio::test]
    async fn history_lists_newest_first() {
        let user_id = Uuid::new_v4();
        let ledger = ledger_with(user_id, 3, 0);
        ledger
            .check_and_consume(&ConsumeRequest {
                user_id,
                feature: Feature::PhotoScan,
                cost: 2,
                idempotency_key: "scan-1".into(),
            })
            .await
            .unwrap();
        ledger.refund(user_id, "scan-1").await.unwrap();

        let txs = ledger.transactions(user_id, 10, 0).await.unwrap();
        let kinds: Vec<TxKind> = txs.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TxKind::Refund, TxKind::Consume]);
        assert_eq!(txs[0].feature, Some(Feature::PhotoScan));
        assert!(ledger.transactions(Uuid::new_v4(), 10, 0).await.unwrap().is_empty());
        assert_eq!(ledger.transactions(user_id, 10, 1).await.unwrap().len(), 1);
    }

    #[test]
    fn transaction_row_maps_unknown_feature_to_none() {
        let tx: CreditTransaction = TransactionRow {
            id: Uuid::nil(),
            kind: "consume".into(),
            feature: Some("teleport".into()),
            subscription_delta: -1,
            lifetime_delta: 0,
            balance_after: 4,
            created_at: datetime!(2026-01-01 00:00 UTC),
        }
        .into();
        assert_eq!(tx.kind, TxKind::Consume);
        assert_eq!(tx.feature, None);
    }
}
