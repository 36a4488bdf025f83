pub mod handlers;
pub mod signature;

use axum::Router;

use crate::state::AppState;

pub use signature::SignatureError;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
