pub mod health;
pub mod messages;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

/// Build the API router.
///
/// Route layout:
/// ```text
/// /health         GET   (no auth)
/// /v1/messages    POST  (bearer credential via x-api-key)
/// ```
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/v1/messages", post(messages::create_message))
}
