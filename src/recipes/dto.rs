use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{portions::Nutrition, repo::RecipeMacros};

#[derive(Debug, Deserialize)]
pub struct HouseholdQuery {
    pub adults: Option<u32>,
    pub children: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ScaledRecipe {
    pub id: Uuid,
    pub title: String,
    pub tags: Vec<String>,
    pub portion_factor: f64,
    pub ingredients: Vec<String>,
    pub nutrition: Nutrition,
    pub instructions: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MacrosPage {
    pub items: Vec<RecipeMacros>,
    pub next_offset: Option<i64>,
}
