use std::sync::Arc;

use axum::Router;

use crate::heartbeat::Heartbeat;

mod health;

// ---

pub fn router(heartbeat: Arc<Heartbeat>) -> Router {
    // ---
    Router::new().merge(health::router()).with_state(heartbeat)
}
