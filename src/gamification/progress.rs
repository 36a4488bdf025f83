//! Points, streak, level and badge projection of the event ledger.

use serde::{Deserialize, Serialize};
use time::{Date, Duration};

time::serde::format_description!(day, Date, "[year]-[month]-[day]");

/// One ledger entry to apply at most once per `idempotency_key`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Award {
    pub event_type: String,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub xp: i64,
    #[serde(default)]
    pub credits: i64,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Progress {
    pub points: i64,
    pub xp: i64,
    pub level: i32,
    pub current_streak: i32,
    pub longest_streak: i32,
    #[serde(with = "day::option")]
    pub last_active_on: Option<Date>,
    pub badges: Vec<String>,
}

/// Level `n` starts at `100 * (n - 1)^2` xp.
pub fn level_for(xp: i64) -> i32 {
    let mut level: i32 = 1;
    while xp >= 100 * i64::from(level) * i64::from(level) {
        level += 1;
    }
    level
}

struct BadgeRule {
    id: &'static str,
    earned: fn(&Progress, &str) -> bool,
}

const BADGES: &[BadgeRule] = &[
    BadgeRule { id: "welcome", earned: |_, event| event == "onboarding_completed" },
    BadgeRule { id: "first_menu", earned: |_, event| event == "menu_generated" },
    BadgeRule { id: "streak_7", earned: |p, _| p.current_streak >= 7 },
    BadgeRule { id: "streak_30", earned: |p, _| p.current_streak >= 30 },
    BadgeRule { id: "level_5", earned: |p, _| p.level >= 5 },
    BadgeRule { id: "points_1000", earned: |p, _| p.points >= 1000 },
];

impl Progress {
    /// Fold one award into the projection. Returns newly earned badges.
    pub fn apply(&mut self, award: &Award, today: Date) -> Vec<String> {
        self.points += award.points;
        self.xp = (self.xp + award.xp).max(0);
        self.level = level_for(self.xp);

        self.current_streak = match self.last_active_on {
            Some(last) if last >= today => self.current_streak.max(1),
            Some(last) if last + Duration::days(1) == today => self.current_streak + 1,
            _ => 1,
        };
        self.longest_streak = self.longest_streak.max(self.current_streak);
        if self.last_active_on.map_or(true, |last| last < today) {
            self.last_active_on = Some(today);
        }

        let mut fresh = Vec::new();
        for rule in BADGES {
            if !self.badges.iter().any(|b| b == rule.id) && (rule.earned)(self, &award.event_type) {
                fresh.push(rule.id.to_string());
            }
        }
        self.badges.extend(fresh.iter().cloned());
        fresh
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn award(event: &str, points: i64, xp: i64) -> Award {
        Award {
            event_type: event.into(),
            points,
            xp,
            credits: 0,
            idempotency_key: "k".into(),
        }
    }

    #[test]
    fn levels_grow_quadratically() {
        assert_eq!(level_for(0), 1);
        assert_eq!(level_for(99), 1);
        assert_eq!(level_for(100), 2);
        assert_eq!(level_for(399), 2);
        assert_eq!(level_for(400), 3);
        assert_eq!(level_for(1600), 5);
    }

    #[test]
    fn consecutive_days_extend_the_streak() {
        let mut p = Progress::default();
        p.apply(&award("menu_generated", 10, 25), date!(2026-03-01));
        p.apply(&award("menu_generated", 10, 25), date!(2026-03-01));
        assert_eq!(p.current_streak, 1);
        p.apply(&award("meal_logged", 5, 5), date!(2026-03-02));
        p.apply(&award("meal_logged", 5, 5), date!(2026-03-03));
        assert_eq!((p.current_streak, p.longest_streak), (3, 3));

        p.apply(&award("meal_logged", 5, 5), date!(2026-03-06));
        assert_eq!((p.current_streak, p.longest_streak), (1, 3));
        assert_eq!(p.points, 35);
    }

    #[test]
    fn badges_are_earned_once() {
        let mut p = Progress::default();
        let fresh = p.apply(&award("onboarding_completed", 50, 100), date!(2026-03-01));
        assert_eq!(fresh, vec!["welcome"]);
        assert_eq!(p.level, 2);
        let fresh = p.apply(&award("onboarding_completed", 50, 100), date!(2026-03-01));
        assert!(fresh.is_empty());
        assert_eq!(p.badges, vec!["welcome"]);
    }

    #[test]
    fn late_event_does_not_rewind_activity() {
        let mut p = Progress::default();
        p.apply(&award("x", 1, 1), date!(2026-03-05));
        p.apply(&award("x", 1, 1), date!(2026-03-04));
        assert_eq!(p.last_active_on, Some(date!(2026-03-05)));
    }
}
