use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use uuid::Uuid;

use super::model::WeeklyMenu;
use crate::recipes::{
    portions::{format_quantity, parse_leading_quantity},
    Recipe,
};

const UNITS: &[&str] = &[
    "g", "kg", "mg", "ml", "cl", "dl", "l", "tsp", "tbsp", "cup", "cups", "cas", "cac", "pinch",
    "pincée", "pincées", "slice", "slices", "tranche", "tranches", "clove", "cloves", "gousse",
    "gousses", "can", "cans", "boîte", "boîtes", "sachet", "sachets",
];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroceryItem {
    pub name: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub display: String,
}

fn split_unit(rest: &str) -> (Option<String>, String) {
    let rest = rest.trim();
    let (first, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let first_lower = first.to_lowercase();
    let (unit, name) = if UNITS.contains(&first_lower.as_str()) {
        (Some(first_lower), tail)
    } else {
        (None, rest)
    };
    let name = name.trim();
    let name = name
        .strip_prefix("de ")
        .or_else(|| name.strip_prefix("d'"))
        .or_else(|| name.strip_prefix("of "))
        .unwrap_or(name);
    (unit, name.trim().to_lowercase())
}

/// Merge ingredient lines of every planned meal, each scaled by its own
/// ratio. Lines sharing a name and unit are summed; lines without a
/// leading quantity are listed once.
pub fn build_grocery_list<'a, I>(meals: I) -> Vec<GroceryItem>
where
    I: IntoIterator<Item = (&'a Recipe, f64)>,
{
    let mut totals: BTreeMap<(String, Option<String>), Option<f64>> = BTreeMap::new();
    for (recipe, ratio) in meals {
        for line in &recipe.ingredients {
            match parse_leading_quantity(line) {
                Some((qty, rest)) => {
                    let (unit, name) = split_unit(rest);
                    if name.is_empty() {
                        continue;
                    }
                    let total = totals.entry((name, unit)).or_insert(Some(0.0));
                    *total = Some(total.unwrap_or(0.0) + qty * ratio);
                }
                None => {
                    let name = line.trim().to_lowercase();
                    if !name.is_empty() {
                        totals.entry((name, None)).or_insert(None);
                    }
                }
            }
        }
    }

    totals
        .into_iter()
        .map(|((name, unit), quantity)| {
            let display = match (quantity, &unit) {
                (Some(q), Some(u)) => format!("{} {u} {name}", format_quantity(q)),
                (Some(q), None) => format!("{} {name}", format_quantity(q)),
                (None, _) => name.clone(),
            };
            GroceryItem { name, quantity, unit, display }
        })
        .collect()
}

fn meal_counts(menu: &WeeklyMenu) -> HashMap<Uuid, usize> {
    let mut counts: HashMap<Uuid, usize> = HashMap::new();
    for meal in menu.days.iter().flat_map(|d| d.meals()) {
        *counts.entry(meal.recipe_id).or_default() += 1;
    }
    counts
}

pub fn menu_recipe_ids(menu: &WeeklyMenu) -> Vec<Uuid> {
    meal_counts(menu).into_keys().collect()
}

/// Groceries for a whole week: a recipe planned twice is bought twice.
/// Recipes missing from `recipes` (deactivated since) are skipped.
pub fn menu_grocery_list(menu: &WeeklyMenu, recipes: &[Recipe], factor: f64) -> Vec<GroceryItem> {
    let counts = meal_counts(menu);
    let meals = recipes.iter().flat_map(|r| {
        let times = counts.get(&r.id).copied().unwrap_or(0);
        std::iter::repeat((r, r.ratio_for(factor))).take(times)
    });
    build_grocery_list(meals)
}
