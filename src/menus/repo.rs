use sqlx::{types::Json, FromRow, PgPool};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::model::{DayOfWeek, DayPlan, MealSlot, PlannedMeal, WeeklyMenu};

#[derive(Debug, FromRow)]
struct MenuRow {
    id: Uuid,
    week_start: Date,
    days: Json<Vec<DayPlan>>,
    updated_at: OffsetDateTime,
}

impl From<MenuRow> for WeeklyMenu {
    fn from(row: MenuRow) -> Self {
        WeeklyMenu {
            id: row.id,
            week_start: row.week_start,
            days: row.days.0,
            updated_at: row.updated_at,
        }
    }
}

/// One menu per user and week; regenerating replaces the days.
pub async fn upsert(
    db: &PgPool,
    user_id: Uuid,
    week_start: Date,
    days: &[DayPlan],
) -> Result<WeeklyMenu, sqlx::Error> {
    let row = sqlx::query_as::<_, MenuRow>(
        r#"
        INSERT INTO weekly_menus (id, user_id, week_start, days)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, week_start)
        DO UPDATE SET days = EXCLUDED.days, updated_at = now()
        RETURNING id, week_start, days, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(week_start)
    .bind(Json(days))
    .fetch_one(db)
    .await?;
    Ok(row.into())
}

pub async fn get(
    db: &PgPool,
    user_id: Uuid,
    week_start: Date,
) -> Result<Option<WeeklyMenu>, sqlx::Error> {
    let row = sqlx::query_as::<_, MenuRow>(
        r#"
        SELECT id, week_start, days, updated_at
          FROM weekly_menus
         WHERE user_id = $1 AND week_start = $2
        "#,
    )
    .bind(user_id)
    .bind(week_start)
    .fetch_optional(db)
    .await?;
    Ok(row.map(Into::into))
}

/// Put `meal` into one slot under the row lock, so concurrent swaps on the
/// same week each see the other's write.
pub async fn replace_meal(
    db: &PgPool,
    user_id: Uuid,
    week_start: Date,
    day: DayOfWeek,
    slot: MealSlot,
    meal: &PlannedMeal,
) -> Result<Option<WeeklyMenu>, sqlx::Error> {
    let mut tx = db.begin().await?;
    let locked: Option<(Json<Vec<DayPlan>>,)> = sqlx::query_as(
        "SELECT days FROM weekly_menus WHERE user_id = $1 AND week_start = $2 FOR UPDATE",
    )
    .bind(user_id)
    .bind(week_start)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((Json(mut days),)) = locked else {
        tx.rollback().await?;
        return Ok(None);
    };

    if let Some(day_plan) = days.iter_mut().find(|d| d.day == day) {
        *day_plan.slot_mut(slot) = Some(meal.clone());
    }
    let row = sqlx::query_as::<_, MenuRow>(
        r#"
        UPDATE weekly_menus
           SET days = $3, updated_at = now()
         WHERE user_id = $1 AND week_start = $2
        RETURNING id, week_start, days, updated_at
        "#,
    )
    .bind(user_id)
    .bind(week_start)
    .bind(Json(&days))
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(Some(row.into()))
}
