use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use time::{Date, OffsetDateTime};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{GenerateMenuRequest, GroceryListResponse, SwapMealRequest, SwapMealResponse},
    grocery::{menu_grocery_list, menu_recipe_ids},
    model::{normalize_meal_key, parse_date, week_start_for, DayOfWeek, WeeklyMenu},
    planner::{self, Household},
    repo,
    service::{menu_award, swap_meal, SwapTarget},
};
use crate::{
    auth::AuthUser,
    credits::validate_idempotency_key,
    error::AppError,
    gamification,
    onboarding::repo as profiles,
    recipes::{self, portions::household_portion_factor},
    state::AppState,
};

const CATALOGUE_LIMIT: i64 = 200;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/menus/generate", post(generate))
        .route("/menus/current", get(current))
        .route("/menus/:week_start", get(get_week))
        .route("/menus/:week_start/swap", post(swap))
        .route("/menus/:week_start/grocery-list", get(grocery_list))
}

fn parse_week(raw: &str) -> Result<Date, AppError> {
    parse_date(raw)
        .map(week_start_for)
        .map_err(|_| AppError::BadRequest("week_start must be YYYY-MM-DD".into()))
}

fn this_week() -> Date {
    week_start_for(OffsetDateTime::now_utc().date())
}

async fn load_profile(state: &AppState, user_id: Uuid) -> Result<profiles::Profile, AppError> {
    profiles::get_profile(&state.db, user_id)
        .await?
        .ok_or(AppError::NotFound("profile"))
}

#[instrument(skip(state, body))]
pub async fn generate(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Option<Json<GenerateMenuRequest>>,
) -> Result<Json<WeeklyMenu>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let week_start = match body.week_start.as_deref() {
        Some(raw) => parse_week(raw)?,
        None => this_week(),
    };

    let profile = load_profile(&state, user_id).await?;
    let catalogue = recipes::repo::list_active(&state.db, CATALOGUE_LIMIT).await?;
    let household = Household {
        adults: profile.adults,
        children: profile.children,
        restrictions: &profile.dietary_restrictions,
    };
    let days = planner::plan_week(state.ai.as_ref(), &household, catalogue).await?;
    let menu = repo::upsert(&state.db, user_id, week_start, &days).await?;
    info!(%user_id, %week_start, "weekly menu generated");

    if let Err(e) = gamification::repo::award(&state.db, user_id, &menu_award(user_id, week_start)).await {
        warn!(error = %e, %user_id, "menu reward failed");
    }
    Ok(Json(menu))
}

#[instrument(skip(state))]
pub async fn current(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<WeeklyMenu>, AppError> {
    repo::get(&state.db, user_id, this_week())
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("menu"))
}

#[instrument(skip(state))]
pub async fn get_week(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(week): Path<String>,
) -> Result<Json<WeeklyMenu>, AppError> {
    let week_start = parse_week(&week)?;
    repo::get(&state.db, user_id, week_start)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("menu"))
}

/// Replace one meal for one swap credit. A failed swap gives the credit
/// back; a key that already paid returns the menu unchanged.
#[instrument(skip(state, body))]
pub async fn swap(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(week): Path<String>,
    Json(body): Json<SwapMealRequest>,
) -> Result<Json<SwapMealResponse>, AppError> {
    let week_start = parse_week(&week)?;
    let day = DayOfWeek::parse(&body.day).ok_or_else(|| AppError::BadRequest("unknown day".into()))?;
    let slot = normalize_meal_key(&body.slot)
        .ok_or_else(|| AppError::BadRequest("unknown meal slot".into()))?;
    validate_idempotency_key(&body.idempotency_key).map_err(AppError::BadRequest)?;

    let menu = repo::get(&state.db, user_id, week_start)
        .await?
        .ok_or(AppError::NotFound("menu"))?;
    let profile = load_profile(&state, user_id).await?;
    let catalogue = recipes::repo::list_active(&state.db, CATALOGUE_LIMIT).await?;

    let target = SwapTarget {
        user_id,
        day,
        slot,
        restrictions: &profile.dietary_restrictions,
        idempotency_key: &body.idempotency_key,
    };
    let db = state.db.clone();
    let res = swap_meal(
        state.ledger.as_ref(),
        state.ai.as_ref(),
        target,
        menu,
        catalogue,
        |meal| async move {
            repo::replace_meal(&db, user_id, week_start, day, slot, &meal)
                .await
                .map_err(AppError::from)
        },
    )
    .await?;
    if !res.receipt.replayed {
        info!(%user_id, %week_start, ?day, slot = slot.as_str(), "meal swapped");
    }
    Ok(Json(res))
}

#[instrument(skip(state))]
pub async fn grocery_list(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(week): Path<String>,
) -> Result<Json<GroceryListResponse>, AppError> {
    let week_start = parse_week(&week)?;
    let menu = repo::get(&state.db, user_id, week_start)
        .await?
        .ok_or(AppError::NotFound("menu"))?;
    let profile = load_profile(&state, user_id).await?;
    let factor = household_portion_factor(profile.adults.max(0) as u32, profile.children.max(0) as u32);

    let planned = recipes::repo::get_many(&state.db, &menu_recipe_ids(&menu)).await?;
    let items = menu_grocery_list(&menu, &planned, factor);

    Ok(Json(GroceryListResponse {
        week_start: week_start.to_string(),
        portion_factor: factor,
        items,
    }))
}
