mod dto;
pub mod grocery;
pub mod handlers;
pub mod model;
pub mod planner;
pub mod repo;
pub mod safety;
pub mod service;

use axum::{middleware, Router};

use crate::{onboarding::require_onboarded, state::AppState};

pub use model::{normalize_meal_key, MealSlot};

/// Menu routes sit behind the onboarding gate.
pub fn router(state: AppState) -> Router<AppState> {
    handlers::routes().route_layer(middleware::from_fn_with_state(state, require_onboarded))
}
