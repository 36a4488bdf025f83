use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date, Duration, OffsetDateTime};
use uuid::Uuid;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MealSlot {
    Lunch,
    Dinner,
}

impl MealSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            MealSlot::Lunch => "lunch",
            MealSlot::Dinner => "dinner",
        }
    }
}

fn fold_accents(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Map the many spellings of a meal name onto a slot; unknown names give `None`.
pub fn normalize_meal_key(raw: &str) -> Option<MealSlot> {
    match fold_accents(raw).as_str() {
        "lunch" | "dejeuner" | "midi" | "midday" | "noon" => Some(MealSlot::Lunch),
        "dinner" | "diner" | "soir" | "evening" | "supper" => Some(MealSlot::Dinner),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match fold_accents(raw).as_str() {
            "monday" | "lundi" | "mon" => Some(DayOfWeek::Monday),
            "tuesday" | "mardi" | "tue" => Some(DayOfWeek::Tuesday),
            "wednesday" | "mercredi" | "wed" => Some(DayOfWeek::Wednesday),
            "thursday" | "jeudi" | "thu" => Some(DayOfWeek::Thursday),
            "friday" | "vendredi" | "fri" => Some(DayOfWeek::Friday),
            "saturday" | "samedi" | "sat" => Some(DayOfWeek::Saturday),
            "sunday" | "dimanche" | "sun" => Some(DayOfWeek::Sunday),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedMeal {
    pub recipe_id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayPlan {
    pub day: DayOfWeek,
    pub lunch: Option<PlannedMeal>,
    pub dinner: Option<PlannedMeal>,
}

impl DayPlan {
    pub fn empty(day: DayOfWeek) -> Self {
        Self { day, lunch: None, dinner: None }
    }

    pub fn slot(&self, slot: MealSlot) -> Option<&PlannedMeal> {
        match slot {
            MealSlot::Lunch => self.lunch.as_ref(),
            MealSlot::Dinner => self.dinner.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, slot: MealSlot) -> &mut Option<PlannedMeal> {
        match slot {
            MealSlot::Lunch => &mut self.lunch,
            MealSlot::Dinner => &mut self.dinner,
        }
    }

    pub fn meals(&self) -> impl Iterator<Item = &PlannedMeal> {
        self.lunch.iter().chain(self.dinner.iter())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyMenu {
    pub id: Uuid,
    #[serde(with = "iso_date")]
    pub week_start: Date,
    pub days: Vec<DayPlan>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Monday of the week containing `date`.
pub fn week_start_for(date: Date) -> Date {
    date - Duration::days(i64::from(date.weekday().number_days_from_monday()))
}

pub fn parse_date(raw: &str) -> Result<Date, time::error::Parse> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn meal_keys_normalize_across_languages() {
        assert_eq!(normalize_meal_key("déjeuner"), Some(MealSlot::Lunch));
        assert_eq!(normalize_meal_key("MIDI"), Some(MealSlot::Lunch));
        assert_eq!(normalize_meal_key("midday"), Some(MealSlot::Lunch));
        assert_eq!(normalize_meal_key(" Dîner "), Some(MealSlot::Dinner));
        assert_eq!(normalize_meal_key("soir"), Some(MealSlot::Dinner));
        assert_eq!(normalize_meal_key("brunch"), None);
        assert_eq!(normalize_meal_key(""), None);
    }

    #[test]
    fn days_parse_in_english_and_french() {
        assert_eq!(DayOfWeek::parse("Mercredi"), Some(DayOfWeek::Wednesday));
        assert_eq!(DayOfWeek::parse("SUNDAY"), Some(DayOfWeek::Sunday));
        assert_eq!(DayOfWeek::parse("someday"), None);
    }

    #[test]
    fn week_starts_on_monday() {
        assert_eq!(week_start_for(date!(2026-03-04)), date!(2026-03-02));
        assert_eq!(week_start_for(date!(2026-03-02)), date!(2026-03-02));
        assert_eq!(week_start_for(date!(2026-03-08)), date!(2026-03-02));
    }

    #[test]
    fn parse_date_accepts_iso_days() {
        assert_eq!(parse_date("2026-03-04").unwrap(), date!(2026-03-04));
        assert!(parse_date("04/03/2026").is_err());
    }

    #[test]
    fn menu_serializes_week_start_as_iso_date() {
        let menu = WeeklyMenu {
            id: Uuid::nil(),
            week_start: date!(2026-03-02),
            days: vec![DayPlan::empty(DayOfWeek::Monday)],
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&menu).unwrap();
        assert_eq!(json["week_start"], "2026-03-02");
        assert_eq!(json["days"][0]["day"], "monday");
    }
}
