use std::time::Duration;

mod admin;
mod ai;
mod app;
mod auth;
mod billing;
mod config;
mod contact;
mod credits;
mod dto;
mod error;
mod gamification;
mod jobs;
mod menus;
mod onboarding;
mod recipes;
mod state;
mod storage;

use crate::{credits::reset_worker::CreditResetWorker, jobs::JobWorker, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "menuzen=debug,axum=info,tower_http=info,sqlx=warn".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = AppState::init().await?;

    if let Err(e) = sqlx::migrate!("./migrations").run(&app_state.db).await {
        tracing::warn!(error = %e, "migration failed; continuing");
    }

    let reset_every = Duration::from_secs(app_state.config.credits.reset_interval_secs.max(1));
    CreditResetWorker::spawn(app_state.ledger.clone(), reset_every);

    let worker_every = Duration::from_secs(app_state.config.jobs.worker_interval_secs.max(1));
    JobWorker::new(
        app_state.jobs.clone(),
        app_state.ai.clone(),
        app_state.ledger.clone(),
        app_state.storage.clone(),
    )
    .spawn(worker_every);

    app::serve(app::build_app(app_state)).await
}
