use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::core::admission::AdmissionSnapshot;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness check for load balancers.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "OK" })
}

/// Read-only view of the admission registry.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<AdmissionSnapshot> {
    Json(state.admission.snapshot())
}
