//! Delivery-side endpoints: health summary, local inbox and token rotation.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dispatch::PresentedNotification;
use crate::health::{suggestions_for, HealthStatus};
use crate::App;

// ---

pub fn router() -> Router<Arc<App>> {
    // ---
    Router::new()
        .route("/delivery/health", get(delivery_health))
        .route("/notifications", get(notifications))
        .route("/registration-token", put(rotate_token))
}

#[derive(Serialize)]
struct DeliveryHealthResponse {
    #[serde(flatten)]
    status: HealthStatus,
    suggestions: Vec<String>,
}

async fn delivery_health(State(app): State<Arc<App>>) -> Json<DeliveryHealthResponse> {
    // ---
    let status = app.health.health_status();
    let suggestions = suggestions_for(&status);
    Json(DeliveryHealthResponse { status, suggestions })
}

async fn notifications(State(app): State<Arc<App>>) -> Json<Vec<PresentedNotification>> {
    Json(app.inbox.recent())
}

#[derive(Debug, Deserialize)]
struct TokenUpdate {
    /// New token; `null` or empty clears it.
    token: Option<String>,
}

/// Handle `PUT /registration-token`.
///
/// Applies to the next remote attempt, including one already in backoff.
async fn rotate_token(
    State(app): State<Arc<App>>,
    Json(update): Json<TokenUpdate>,
) -> impl IntoResponse {
    // ---
    let present = update.token.as_deref().is_some_and(|t| !t.is_empty());
    info!(present, "PUT /registration-token");
    app.token.rotate(update.token);
    StatusCode::NO_CONTENT
}
