use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::gate::OnboardingState;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Client route being navigated to.
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: OnboardingState,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub redirect_to: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub adults: i32,
    #[serde(default)]
    pub children: i32,
    #[serde(default)]
    pub dietary_restrictions: Vec<String>,
    pub onboarding_step: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub state: OnboardingState,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}
