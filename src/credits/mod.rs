mod dto;
pub mod handlers;
pub mod ledger;
pub mod reset_worker;
pub mod service;
pub mod wallet;

use axum::Router;

use crate::state::AppState;

pub use ledger::{
    ConsumeReceipt, CreditLedger, GrantRequest, LedgerError, PgCreditLedger, TxKind,
};
pub use service::{
    check_and_consume_credits, refund_charge, validate_idempotency_key, ConsumeError,
};
pub use wallet::{CreditPool, Debit, Feature, Plan, Wallet};

pub fn router() -> Router<AppState> {
    handlers::routes()
}
