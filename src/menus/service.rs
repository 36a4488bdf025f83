use std::future::Future;

use time::Date;
use tracing::warn;
use uuid::Uuid;

use super::{
    dto::SwapMealResponse,
    model::{DayOfWeek, MealSlot, PlannedMeal, WeeklyMenu},
    planner,
};
use crate::{
    ai::AiGateway,
    credits::{check_and_consume_credits, refund_charge, CreditLedger, Feature},
    error::AppError,
    gamification::Award,
    recipes::Recipe,
};

pub fn swap_charge_key(idempotency_key: &str) -> String {
    format!("swap:{}", idempotency_key.trim())
}

/// One generation reward per user and week, however often it is regenerated.
pub fn menu_award(user_id: Uuid, week_start: Date) -> Award {
    Award {
        event_type: "menu_generated".into(),
        points: 10,
        xp: 25,
        credits: 0,
        idempotency_key: format!("menu:{user_id}:{week_start}"),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SwapTarget<'a> {
    pub user_id: Uuid,
    pub day: DayOfWeek,
    pub slot: MealSlot,
    pub restrictions: &'a [String],
    pub idempotency_key: &'a str,
}

/// Charge one swap credit, pick a replacement and hand it to `store`.
///
/// A key that already paid returns `menu` as is. Every failure after the
/// charge refunds it, so retrying with the same key pays again.
pub async fn swap_meal<F, Fut>(
    ledger: &dyn CreditLedger,
    ai: &dyn AiGateway,
    target: SwapTarget<'_>,
    menu: WeeklyMenu,
    catalogue: Vec<Recipe>,
    store: F,
) -> Result<SwapMealResponse, AppError>
where
    F: FnOnce(PlannedMeal) -> Fut,
    Fut: Future<Output = Result<Option<WeeklyMenu>, AppError>>,
{
    let feature = Feature::MenuSwap;
    let charge_key = swap_charge_key(target.idempotency_key);
    let receipt = check_and_consume_credits(
        ledger,
        Some(target.user_id),
        feature,
        feature.cost(),
        &charge_key,
    )
    .await?;
    if receipt.replayed {
        return Ok(SwapMealResponse { menu, receipt });
    }

    let current = menu
        .days
        .iter()
        .find(|d| d.day == target.day)
        .and_then(|d| d.slot(target.slot))
        .map(|m| m.recipe_id);
    let swapped = match planner::pick_alternative(
        ai,
        target.slot,
        target.restrictions,
        catalogue,
        current,
    )
    .await
    {
        Ok(meal) => store(meal)
            .await
            .and_then(|stored| stored.ok_or(AppError::NotFound("menu"))),
        Err(e) => Err(e),
    };

    match swapped {
        Ok(menu) => Ok(SwapMealResponse { menu, receipt }),
        Err(e) => {
            if let Err(refund_err) = refund_charge(ledger, target.user_id, &charge_key).await {
                warn!(error = %refund_err, user_id = %target.user_id, "swap refund failed");
            }
            Err(e)
        }
    }
}
