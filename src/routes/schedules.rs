use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::info;

use crate::schedule::Schedule;
use crate::App;

// ---

pub fn router() -> Router<Arc<App>> {
    // ---
    Router::new()
        .route("/schedules", get(list))
        .route("/schedules/reschedule", post(reschedule))
        .route("/schedules/{id}", delete(cancel))
}

async fn list(State(app): State<Arc<App>>) -> Json<Vec<Schedule>> {
    Json(app.schedules.schedules().await)
}

async fn reschedule(State(app): State<Arc<App>>) -> Json<Vec<Schedule>> {
    // ---
    info!("POST /schedules/reschedule");
    app.schedules.reschedule_all().await;
    Json(app.schedules.schedules().await)
}

/// Handle `DELETE /schedules/{id}`; unknown ids are a 404.
async fn cancel(State(app): State<Arc<App>>, Path(id): Path<String>) -> impl IntoResponse {
    // ---
    if app.schedules.cancel_notification(&id).await {
        info!(id = %id, "DELETE /schedules - cancelled");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
