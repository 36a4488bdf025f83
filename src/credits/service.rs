use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    ledger::{ConsumeReceipt, ConsumeRequest, CreditLedger, LedgerError},
    wallet::Feature,
};

/// Outcome classes of a consumption attempt as seen by callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsumeError {
    #[error("no active session")]
    Unauthorized,
    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },
    #[error("ledger call failed: {0}")]
    Rpc(String),
}

pub fn validate_idempotency_key(key: &str) -> Result<(), String> {
    let key = key.trim();
    if key.is_empty() {
        return Err("idempotency_key is required".into());
    }
    if key.len() > 128 {
        return Err("idempotency_key must be at most 128 characters".into());
    }
    Ok(())
}

/// Check and debit `cost` credits for `feature` in a single ledger call.
/// Without a session the ledger is not contacted at all.
#[instrument(skip(ledger))]
pub async fn check_and_consume_credits(
    ledger: &dyn CreditLedger,
    session: Option<Uuid>,
    feature: Feature,
    cost: i64,
    idempotency_key: &str,
) -> Result<ConsumeReceipt, ConsumeError> {
    let Some(user_id) = session else {
        return Err(ConsumeError::Unauthorized);
    };

    let req = ConsumeRequest {
        user_id,
        feature,
        cost,
        idempotency_key: idempotency_key.trim().to_string(),
    };
    match ledger.check_and_consume(&req).await {
        Ok(receipt) => Ok(receipt),
        Err(LedgerError::Insufficient { balance, required }) => {
            Err(ConsumeError::InsufficientCredits { balance, required })
        }
        Err(e) => {
            warn!(error = %e, %user_id, feature = feature.as_str(), "credit consumption failed");
            Err(ConsumeError::Rpc(e.to_string()))
        }
    }
}

/// Refund whatever is live under `charge_key`. The charge is voided, so a
/// second refund is a no-op and a retry with the same key pays again.
pub async fn refund_charge(
    ledger: &dyn CreditLedger,
    user_id: Uuid,
    charge_key: &str,
) -> Result<bool, LedgerError> {
    let refunded = ledger.refund(user_id, charge_key.trim()).await?.is_some();
    if !refunded {
        warn!(%user_id, key = charge_key, "no live charge to refund");
    }
    Ok(refunded)
}
