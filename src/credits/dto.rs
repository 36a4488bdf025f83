use serde::{Deserialize, Serialize};

use super::{ledger::ConsumeReceipt, wallet::{Feature, Wallet}};

#[derive(Debug, Deserialize)]
pub struct ConsumeCreditsRequest {
    pub feature: Feature,
    /// Defaults to the feature's price; may only raise it.
    pub cost: Option<i64>,
    pub idempotency_key: String,
}

#[derive(Debug, Serialize)]
pub struct ConsumeCreditsResponse {
    #[serde(flatten)]
    pub receipt: ConsumeReceipt,
}

#[derive(Debug, Serialize)]
pub struct WalletResponse {
    #[serde(flatten)]
    pub wallet: Wallet,
    pub balance: i64,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        let balance = wallet.balance();
        Self { wallet, balance }
    }
}
