use std::fmt::Display;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::warn;

pub const ONBOARDING_PATH: &str = "/app/onboarding";

/// Paths reachable without a completed onboarding. Matched on segment boundaries.
const EXEMPT_PREFIXES: &[&str] = &[
    ONBOARDING_PATH,
    "/auth",
    "/login",
    "/signup",
    "/logout",
    "/legal",
    "/pricing",
    "/contact",
];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingState {
    NeedsOnboarding,
    Onboarded,
}

impl OnboardingState {
    /// `onboarding_completed_at` is the only field that decides the state.
    pub fn from_completed_at(completed_at: Option<OffsetDateTime>) -> Self {
        match completed_at {
            Some(_) => OnboardingState::Onboarded,
            None => OnboardingState::NeedsOnboarding,
        }
    }

    /// Resolve a status lookup. A failed lookup counts as onboarded when
    /// `fail_open` is set so a broken check never traps the user.
    pub fn resolve<E: Display>(
        lookup: Result<Option<OffsetDateTime>, E>,
        fail_open: bool,
    ) -> Self {
        match lookup {
            Ok(completed_at) => Self::from_completed_at(completed_at),
            Err(e) if fail_open => {
                warn!(error = %e, "onboarding lookup failed, failing open");
                OnboardingState::Onboarded
            }
            Err(e) => {
                warn!(error = %e, "onboarding lookup failed, failing closed");
                OnboardingState::NeedsOnboarding
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Redirect(&'static str),
}

pub fn is_exempt(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    if path.is_empty() || path == "/" {
        return true;
    }
    EXEMPT_PREFIXES.iter().any(|prefix| {
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

pub fn decide(path: &str, state: OnboardingState) -> GateDecision {
    match state {
        OnboardingState::Onboarded => GateDecision::Allow,
        OnboardingState::NeedsOnboarding if is_exempt(path) => GateDecision::Allow,
        OnboardingState::NeedsOnboarding => GateDecision::Redirect(ONBOARDING_PATH),
    }
}

/// Issues at most one redirect per navigation: once it redirected away from
/// a path, re-checking that same path allows it instead of looping.
#[derive(Debug, Default)]
pub struct NavigationGuard {
    redirected_from: Option<String>,
}

impl NavigationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, path: &str, state: OnboardingState) -> GateDecision {
        match decide(path, state) {
            GateDecision::Allow => {
                if state == OnboardingState::Onboarded {
                    self.redirected_from = None;
                }
                GateDecision::Allow
            }
            GateDecision::Redirect(target) => {
                if self.redirected_from.as_deref() == Some(path) {
                    return GateDecision::Allow;
                }
                self.redirected_from = Some(path.to_string());
                GateDecision::Redirect(target)
            }
        }
    }
}
