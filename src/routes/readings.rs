use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use tracing::{debug, info};

use crate::{App, RawReading, Reading};

// ---

pub fn router() -> Router<Arc<App>> {
    // ---
    Router::new().route("/readings", post(handler))
}

/// Handle `POST /readings`: run a pushed batch through the engine.
async fn handler(
    State(app): State<Arc<App>>,
    Json(batch): Json<Vec<RawReading>>,
) -> impl IntoResponse {
    // ---
    info!("POST /readings - {} readings", batch.len());

    let readings: Vec<Reading> = batch.into_iter().map(Reading::from).collect();
    let report = app.process(&readings).await;

    debug!(
        fired = report.fired.len(),
        resolved = report.resolved.len(),
        "POST /readings - Returning OK"
    );
    (StatusCode::OK, Json(report))
}
