use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    dto::{HouseholdQuery, MacrosPage, ScaledRecipe},
    portions::{household_portion_factor, scale_ingredient_line},
    repo::{self, Recipe},
};
use crate::{
    auth::AuthUser,
    dto::Pagination,
    error::AppError,
    onboarding::{handlers::MAX_HOUSEHOLD_MEMBERS, repo as profiles},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/recipes/:id", get(get_recipe))
        .route("/recipes/macros", get(macros_page))
}

pub fn scale_recipe(recipe: Recipe, portion_factor: f64) -> ScaledRecipe {
    let ratio = recipe.ratio_for(portion_factor);
    ScaledRecipe {
        nutrition: recipe.nutrition().scale(ratio),
        ingredients: recipe
            .ingredients
            .iter()
            .map(|line| scale_ingredient_line(line, ratio))
            .collect(),
        id: recipe.id,
        title: recipe.title,
        tags: recipe.tags,
        portion_factor,
        instructions: recipe.instructions,
    }
}

/// Query overrides win; otherwise the saved household, otherwise one adult.
/// Household sizes given on the query follow the profile bounds.
fn query_household(q: &HouseholdQuery) -> Result<Option<(u32, u32)>, AppError> {
    let max = MAX_HOUSEHOLD_MEMBERS as u32;
    let Some(adults) = q.adults else {
        return Ok(None);
    };
    if !(1..=max).contains(&adults) {
        return Err(AppError::BadRequest(format!("adults must be between 1 and {max}")));
    }
    let children = q.children.unwrap_or(0);
    if children > max {
        return Err(AppError::BadRequest(format!("children must be between 0 and {max}")));
    }
    Ok(Some((adults, children)))
}

async fn household_factor(state: &AppState, user_id: Uuid, q: &HouseholdQuery) -> Result<f64, AppError> {
    if let Some((adults, children)) = query_household(q)? {
        return Ok(household_portion_factor(adults, children));
    }
    Ok(match profiles::get_profile(&state.db, user_id).await {
        Ok(Some(p)) => household_portion_factor(p.adults.max(0) as u32, p.children.max(0) as u32),
        Ok(None) => household_portion_factor(1, 0),
        Err(e) => {
            warn!(error = %e, %user_id, "profile lookup failed, scaling for one adult");
            household_portion_factor(1, 0)
        }
    })
}

#[instrument(skip(state))]
pub async fn get_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Query(q): Query<HouseholdQuery>,
) -> Result<Json<ScaledRecipe>, AppError> {
    query_household(&q)?;
    let recipe = repo::get(&state.db, id).await?.ok_or(AppError::NotFound("recipe"))?;
    let factor = household_factor(&state, user_id, &q).await?;
    Ok(Json(scale_recipe(recipe, factor)))
}

#[instrument(skip(state))]
pub async fn macros_page(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<MacrosPage>, AppError> {
    let (limit, offset) = p.clamped();
    let items = repo::macros_page(&state.db, limit, offset).await?;
    let next_offset = (items.len() as i64 == limit).then_some(offset + limit);
    Ok(Json(MacrosPage { items, next_offset }))
}
