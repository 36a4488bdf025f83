//! Turns model answers into validated weekly plans.
//!
//! The model only ever sees recipes that already passed the dietary filter,
//! and every id it answers with is checked again against that safe set.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{
    model::{normalize_meal_key, DayOfWeek, DayPlan, MealSlot, PlannedMeal},
    safety::safe_candidates,
};
use crate::{
    ai::{AiGateway, AiTask, Candidate},
    error::AppError,
    recipes::Recipe,
};

#[derive(Debug, Clone)]
pub struct Household<'a> {
    pub adults: i32,
    pub children: i32,
    pub restrictions: &'a [String],
}

fn candidates(recipes: &[&Recipe]) -> Vec<Candidate> {
    recipes
        .iter()
        .map(|r| Candidate {
            id: r.id,
            title: r.title.clone(),
            tags: r.tags.clone(),
        })
        .collect()
}

fn planned(recipe: &Recipe) -> PlannedMeal {
    PlannedMeal {
        recipe_id: recipe.id,
        title: recipe.title.clone(),
    }
}

/// Answer slots may be a bare id or `{"recipe_id": id}`.
fn answer_id(value: &Value) -> Option<Uuid> {
    value
        .as_str()
        .or_else(|| value.get("recipe_id").and_then(Value::as_str))
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
}

pub async fn plan_week(
    ai: &dyn AiGateway,
    household: &Household<'_>,
    catalogue: Vec<Recipe>,
) -> Result<Vec<DayPlan>, AppError> {
    let safe = safe_candidates(catalogue, household.restrictions);
    if safe.is_empty() {
        return Err(AppError::NoSafeRecipes);
    }
    let task = AiTask::PlanWeek {
        adults: household.adults,
        children: household.children,
        restrictions: household.restrictions.to_vec(),
        candidates: candidates(&safe.iter().collect::<Vec<_>>()),
    };
    let answer = ai.run(&task).await?;
    assemble_plan(&answer, &safe)
}

/// Build seven days from the model answer. Unknown day or meal keys are
/// ignored, ids outside `safe` are rejected and empty slots are filled
/// round-robin from the safe set.
pub fn assemble_plan(answer: &Value, safe: &[Recipe]) -> Result<Vec<DayPlan>, AppError> {
    if safe.is_empty() {
        return Err(AppError::NoSafeRecipes);
    }
    let by_id: HashMap<Uuid, &Recipe> = safe.iter().map(|r| (r.id, r)).collect();
    let days = answer
        .get("days")
        .unwrap_or(answer)
        .as_object()
        .ok_or_else(|| AppError::Rpc("menu answer is not an object".into()))?;

    let mut plan: Vec<DayPlan> = DayOfWeek::ALL.iter().map(|d| DayPlan::empty(*d)).collect();
    for (day_key, slots) in days {
        let Some(day) = DayOfWeek::parse(day_key) else {
            debug!(day_key, "ignoring unknown day");
            continue;
        };
        let Some(slots) = slots.as_object() else {
            continue;
        };
        for (meal_key, value) in slots {
            let Some(slot) = normalize_meal_key(meal_key) else {
                debug!(meal_key, "ignoring unknown meal");
                continue;
            };
            let recipe = answer_id(value)
                .and_then(|id| by_id.get(&id).copied())
                .ok_or_else(|| {
                    AppError::SafetyValidationFailed(format!(
                        "{day_key}/{meal_key} is not one of the safe recipes"
                    ))
                })?;
            if let Some(day_plan) = plan.iter_mut().find(|p| p.day == day) {
                *day_plan.slot_mut(slot) = Some(planned(recipe));
            }
        }
    }
    fill_gaps(&mut plan, safe);
    Ok(plan)
}

fn fill_gaps(plan: &mut [DayPlan], safe: &[Recipe]) {
    let used: HashSet<Uuid> = plan.iter().flat_map(|d| d.meals()).map(|m| m.recipe_id).collect();
    let order: Vec<&Recipe> = safe
        .iter()
        .filter(|r| !used.contains(&r.id))
        .chain(safe.iter())
        .collect();
    let mut next = 0;
    for day in plan.iter_mut() {
        for slot in [MealSlot::Lunch, MealSlot::Dinner] {
            let entry = day.slot_mut(slot);
            if entry.is_none() {
                *entry = Some(planned(order[next % order.len()]));
                next += 1;
            }
        }
    }
}

/// Ask for a replacement for one slot, never returning `current`.
pub async fn pick_alternative(
    ai: &dyn AiGateway,
    slot: MealSlot,
    restrictions: &[String],
    catalogue: Vec<Recipe>,
    current: Option<Uuid>,
) -> Result<PlannedMeal, AppError> {
    let safe = safe_candidates(catalogue, restrictions);
    let pool: Vec<&Recipe> = safe.iter().filter(|r| Some(r.id) != current).collect();
    if pool.is_empty() {
        return Err(AppError::NoSafeRecipes);
    }
    let task = AiTask::PickAlternative {
        slot: slot.as_str().to_string(),
        restrictions: restrictions.to_vec(),
        candidates: candidates(&pool),
        exclude: current.into_iter().collect(),
    };
    let answer = ai.run(&task).await?;
    let id = answer_id(&answer)
        .ok_or_else(|| AppError::Rpc("alternative answer has no recipe_id".into()))?;
    pool.iter()
        .find(|r| r.id == id)
        .map(|r| planned(r))
        .ok_or_else(|| {
            AppError::SafetyValidationFailed(format!("{id} is not an allowed alternative"))
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{ai::fake::FakeAi, menus::safety::tests::recipe};

    fn catalogue() -> Vec<Recipe> {
        vec![
            recipe("Dal", &["200 g lentils"]),
            recipe("Ratatouille", &["2 courgettes", "1 aubergine"]),
            recipe("Steak frites", &["2 steaks de boeuf", "500 g potatoes"]),
        ]
    }

    #[test]
    fn assemble_plan_normalizes_keys_and_fills_gaps() {
        let safe = catalogue();
        let dal = safe[0].id;
        let answer = json!({ "days": {
            "Lundi": { "déjeuner": dal.to_string(), "brunch": "ignored" },
            "tuesday": { "MIDI": { "recipe_id": dal.to_string() } },
        }});
        let plan = assemble_plan(&answer, &safe).unwrap();
        assert_eq!(plan.len(), 7);
        assert_eq!(plan[0].lunch.as_ref().unwrap().recipe_id, dal);
        assert_eq!(plan[1].lunch.as_ref().unwrap().recipe_id, dal);
        assert!(plan.iter().all(|d| d.lunch.is_some() && d.dinner.is_some()));
        // unused recipes come first when filling
        assert_ne!(plan[0].dinner.as_ref().unwrap().recipe_id, dal);
    }

    #[test]
    fn ids_outside_safe_set_fail_validation() {
        let safe = catalogue();
        let answer = json!({ "days": { "monday": { "dinner": Uuid::new_v4().to_string() } } });
        let err = assemble_plan(&answer, &safe).unwrap_err();
        assert_eq!(err.code(), "SAFETY_VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn plan_week_without_safe_recipes_fails() {
        let ai = FakeAi::default();
        let only_meat = vec![recipe("Steak", &["1 steak de boeuf"])];
        let restrictions = vec!["vegetarian".to_string()];
        let household = Household { adults: 2, children: 0, restrictions: &restrictions };
        let err = plan_week(&ai, &household, only_meat).await.unwrap_err();
        assert_eq!(err.code(), "NO_SAFE_RECIPES");
    }

    #[tokio::test]
    async fn plan_week_rejects_unsafe_model_choice() {
        let recipes = catalogue();
        let steak = recipes[2].id;
        let ai = FakeAi::default().answer(
            "plan_week",
            Ok(json!({ "days": { "friday": { "soir": steak.to_string() } } })),
        );
        let restrictions = vec!["vegetarian".to_string()];
        let household = Household { adults: 1, children: 1, restrictions: &restrictions };
        let err = plan_week(&ai, &household, recipes).await.unwrap_err();
        assert_eq!(err.code(), "SAFETY_VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn alternative_must_differ_from_current() {
        let recipes = catalogue();
        let dal = recipes[0].id;
        let ai = FakeAi::default()
            .answer("pick_alternative", Ok(json!({ "recipe_id": dal.to_string() })));
        let err = pick_alternative(&ai, MealSlot::Dinner, &[], recipes.clone(), Some(dal))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SAFETY_VALIDATION_FAILED");

        let ratatouille = recipes[1].id;
        let ai = FakeAi::default()
            .answer("pick_alternative", Ok(json!({ "recipe_id": ratatouille.to_string() })));
        let meal = pick_alternative(&ai, MealSlot::Dinner, &[], recipes, Some(dal))
            .await
            .unwrap();
        assert_eq!(meal.title, "Ratatouille");
    }

    #[tokio::test]
    async fn gateway_errors_surface_as_rpc() {
        let ai = FakeAi::default();
        let household = Household { adults: 1, children: 0, restrictions: &[] };
        let err = plan_week(&ai, &household, catalogue()).await.unwrap_err();
        assert_eq!(err.code(), "RPC_ERROR");
    }
}
