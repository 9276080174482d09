// src/routes/health.rs
//! Health check endpoint for the CWSI engine.
//!
//! This module defines the `/health` route used by container orchestrators
//! (e.g., Docker, Kubernetes) to verify that the service is running. Besides
//! liveness it reports when the analysis scheduler last ticked and when the
//! nightly audit last ran, so a stalled worker is visible from outside.
//!
//! Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::heartbeat::Heartbeat;

/// JSON response body for the `/health` endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    last_tick: Option<DateTime<Utc>>,
    last_audit: Option<DateTime<Utc>>,
    cycles_completed: u64,
}

/// Handle `GET /health`.
///
/// Reads the shared heartbeat only; does not touch the database or any
/// external service.
async fn health(State(heartbeat): State<Arc<Heartbeat>>) -> Json<HealthResponse> {
    // ---
    let snapshot = heartbeat.snapshot();
    Json(HealthResponse {
        status: "ok",
        last_tick: snapshot.last_tick,
        last_audit: snapshot.last_audit,
        cycles_completed: snapshot.cycles_completed,
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<Arc<Heartbeat>> {
    Router::new().route("/health", get(health))
}
