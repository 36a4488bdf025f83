use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::portions::Nutrition;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Recipe {
    pub id: Uuid,
    pub title: String,
    pub ingredients: Vec<String>,
    pub tags: Vec<String>,
    pub base_servings: i32,
    pub calories_kcal: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub instructions: Option<String>,
}

impl Recipe {
    pub fn nutrition(&self) -> Nutrition {
        Nutrition {
            calories_kcal: self.calories_kcal,
            protein_g: self.protein_g,
            carbs_g: self.carbs_g,
            fat_g: self.fat_g,
        }
    }

    /// Nutrition and quantities in the catalogue are for `base_servings` people.
    pub fn ratio_for(&self, household_factor: f64) -> f64 {
        household_factor / f64::from(self.base_servings.max(1))
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RecipeMacros {
    pub id: Uuid,
    pub title: String,
    pub calories_kcal: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

const RECIPE_COLUMNS: &str = "id, title, ingredients, tags, base_servings, calories_kcal, \
                              protein_g, carbs_g, fat_g, instructions";

pub async fn get(db: &PgPool, id: Uuid) -> Result<Option<Recipe>, sqlx::Error> {
    sqlx::query_as::<_, Recipe>(&format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = $1"))
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn get_many(db: &PgPool, ids: &[Uuid]) -> Result<Vec<Recipe>, sqlx::Error> {
    sqlx::query_as::<_, Recipe>(&format!(
        "SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ANY($1)"
    ))
    .bind(ids)
    .fetch_all(db)
    .await
}

/// Active catalogue used as the candidate pool for menu generation.
pub async fn list_active(db: &PgPool, limit: i64) -> Result<Vec<Recipe>, sqlx::Error> {
    sqlx::query_as::<_, Recipe>(&format!(
        "SELECT {RECIPE_COLUMNS} FROM recipes WHERE is_active ORDER BY created_at DESC LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(db)
    .await
}

/// One page of per-serving macros ordered by title.
pub async fn macros_page(
    db: &PgPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<RecipeMacros>, sqlx::Error> {
    sqlx::query_as::<_, RecipeMacros>(
        r#"
        SELECT id, title,
               calories_kcal / GREATEST(base_servings, 1) AS calories_kcal,
               protein_g / GREATEST(base_servings, 1)     AS protein_g,
               carbs_g / GREATEST(base_servings, 1)       AS carbs_g,
               fat_g / GREATEST(base_servings, 1)         AS fat_g
          FROM recipes
         WHERE is_active
         ORDER BY title, id
         LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
}
