use std::sync::Arc;

use axum::Router;

use crate::App;

mod delivery;
mod health;
mod readings;
mod schedules;

// ---

pub fn router(app: Arc<App>) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(delivery::router())
        .merge(schedules::router())
        .merge(health::router())
        .with_state(app)
}
