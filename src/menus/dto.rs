use serde::{Deserialize, Serialize};

use super::{grocery::GroceryItem, model::WeeklyMenu};
use crate::credits::ConsumeReceipt;

#[derive(Debug, Default, Deserialize)]
pub struct GenerateMenuRequest {
    /// Any day of the target week, `YYYY-MM-DD`. Defaults to this week.
    pub week_start: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SwapMealRequest {
    pub day: String,
    pub slot: String,
    pub idempotency_key: String,
}

#[derive(Debug, Serialize)]
pub struct SwapMealResponse {
    pub menu: WeeklyMenu,
    pub receipt: ConsumeReceipt,
}

#[derive(Debug, Serialize)]
pub struct GroceryListResponse {
    pub week_start: String,
    pub portion_factor: f64,
    pub items: Vec<GroceryItem>,
}
