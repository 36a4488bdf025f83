use serde::{Deserialize, Serialize};
use time::{util::days_in_year_month, Duration, Month, OffsetDateTime};
use uuid::Uuid;

/// Subscription plan backing the periodic allowance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Premium,
}

impl Plan {
    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Premium => "premium",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "premium" => Plan::Premium,
            _ => Plan::Free,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResetCadence {
    Weekly,
    Monthly,
}

impl ResetCadence {
    pub fn as_str(self) -> &'static str {
        match self {
            ResetCadence::Weekly => "weekly",
            ResetCadence::Monthly => "monthly",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "weekly" => ResetCadence::Weekly,
            _ => ResetCadence::Monthly,
        }
    }

    /// Next reset instant one cycle after `from`.
    pub fn advance(self, from: OffsetDateTime) -> OffsetDateTime {
        match self {
            ResetCadence::Weekly => from + Duration::weeks(1),
            ResetCadence::Monthly => add_one_month(from),
        }
    }
}

/// Same day next month, clamped to the last day (Jan 31 -> Feb 28/29).
fn add_one_month(from: OffsetDateTime) -> OffsetDateTime {
    let (year, month) = match from.month() {
        Month::December => (from.year() + 1, Month::January),
        m => (from.year(), m.next()),
    };
    let day = from.day().min(days_in_year_month(year, month));
    match time::Date::from_calendar_date(year, month, day) {
        Ok(date) => from.replace_date(date),
        // unreachable with a clamped day; keep moving forward regardless
        Err(_) => from + Duration::days(30),
    }
}

/// Premium features that cost credits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    MenuSwap,
    PhotoScan,
    FridgeInspiration,
    Substitution,
}

impl Feature {
    pub fn cost(self) -> i64 {
        match self {
            Feature::MenuSwap => 1,
            Feature::PhotoScan => 2,
            Feature::FridgeInspiration => 2,
            Feature::Substitution => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Feature::MenuSwap => "menu_swap",
            Feature::PhotoScan => "photo_scan",
            Feature::FridgeInspiration => "fridge_inspiration",
            Feature::Substitution => "substitution",
        }
    }

    pub fn from_db(raw: &str) -> Option<Self> {
        match raw {
            "menu_swap" => Some(Feature::MenuSwap),
            "photo_scan" => Some(Feature::PhotoScan),
            "fridge_inspiration" => Some(Feature::FridgeInspiration),
            "substitution" => Some(Feature::Substitution),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreditPool {
    Subscription,
    Lifetime,
}

/// How a debit splits across the two pools.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct Debit {
    pub subscription: i64,
    pub lifetime: i64,
}

impl Debit {
    pub fn total(&self) -> i64 {
        self.subscription + self.lifetime
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insufficient {
    pub balance: i64,
    pub required: i64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ResetOutcome {
    pub previous_subscription: i64,
    pub subscription_credits: i64,
    pub next_reset_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Wallet {
    pub user_id: Uuid,
    pub plan: Plan,
    pub subscription_credits: i64,
    pub lifetime_credits: i64,
    pub cycle_allowance: i64,
    pub reset_cadence: ResetCadence,
    #[serde(with = "time::serde::rfc3339")]
    pub next_reset_at: OffsetDateTime,
}

impl Wallet {
    pub fn new(user_id: Uuid, plan: Plan, allowance: i64, now: OffsetDateTime) -> Self {
        let cadence = ResetCadence::Monthly;
        Self {
            user_id,
            plan,
            subscription_credits: allowance,
            lifetime_credits: 0,
            cycle_allowance: allowance,
            reset_cadence: cadence,
            next_reset_at: cadence.advance(now),
        }
    }

    pub fn balance(&self) -> i64 {
        self.subscription_credits + self.lifetime_credits
    }

    /// Split `cost` across pools, subscription credits first.
    pub fn plan_debit(&self, cost: i64) -> Result<Debit, Insufficient> {
        if cost <= 0 {
            return Ok(Debit::default());
        }
        if self.balance() < cost {
            return Err(Insufficient {
                balance: self.balance(),
                required: cost,
            });
        }
        let subscription = cost.min(self.subscription_credits.max(0));
        Ok(Debit {
            subscription,
            lifetime: cost - subscription,
        })
    }

    pub fn apply_debit(&mut self, debit: Debit) {
        self.subscription_credits -= debit.subscription;
        self.lifetime_credits -= debit.lifetime;
    }

    pub fn credit(&mut self, pool: CreditPool, amount: i64) {
        match pool {
            CreditPool::Subscription => self.subscription_credits += amount,
            CreditPool::Lifetime => self.lifetime_credits += amount,
        }
    }

    pub fn is_reset_due(&self, now: OffsetDateTime) -> bool {
        self.next_reset_at <= now
    }

    /// Refill the subscription pool to the allowance and move the next reset
    /// past `now`, skipping cycles that were missed. Lifetime credits are untouched.
    pub fn apply_reset(&mut self, now: OffsetDateTime) -> Option<ResetOutcome> {
        if !self.is_reset_due(now) {
            return None;
        }
        let previous_subscription = self.subscription_credits;
        self.subscription_credits = self.cycle_allowance;
        let mut next = self.next_reset_at;
        while next <= now {
            next = self.reset_cadence.advance(next);
        }
        self.next_reset_at = next;
        Some(ResetOutcome {
            previous_subscription,
            subscription_credits: self.subscription_credits,
            next_reset_at: next,
        })
    }

    /// Switch plan. Only an upgrade into premium tops the current cycle up to
    /// the new allowance; staying on a plan changes nothing until the next reset.
    pub fn change_plan(&mut self, plan: Plan, allowance: i64) {
        let upgrade = self.plan != Plan::Premium && plan == Plan::Premium;
        self.plan = plan;
        self.cycle_allowance = allowance;
        if upgrade {
            self.subscription_credits = self.subscription_credits.max(allowance);
        }
    }
}
