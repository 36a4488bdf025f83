mod dto;
pub mod handlers;
pub mod model;
pub mod poller;
pub mod store;
pub mod worker;

use axum::Router;

use crate::state::AppState;

pub use model::{AutomationJob, JobKind, JobStatus};
pub use poller::{poll_until_terminal, PollError, PollPolicy};
pub use store::{JobStore, JobStoreError, PgJobStore};
pub use worker::JobWorker;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
