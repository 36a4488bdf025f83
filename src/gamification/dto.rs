use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{progress::{Award, Progress}, repo::GamificationEvent};
use crate::{credits::Wallet, onboarding::OnboardingState};

#[derive(Debug, Serialize)]
pub struct GamificationProfileResponse {
    pub progress: Progress,
    pub recent_events: Vec<GamificationEvent>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub wallet: Wallet,
    pub balance: i64,
    pub progress: Progress,
    pub onboarding: OnboardingState,
    pub has_current_menu: bool,
}

#[derive(Debug, Deserialize)]
pub struct AdminAwardRequest {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub award: Award,
}
