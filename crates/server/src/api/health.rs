//! Health and status summaries.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use propd_engine::HealthReport;
use serde::Serialize;

use crate::state::AppState;

fn status_code(report: &HealthReport) -> StatusCode {
    StatusCode::from_u16(report.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReport>) {
    let report = state.manager.health();
    (status_code(&report), Json(report))
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub health: HealthReport,
    /// Seconds since the process started serving.
    pub uptime: u64,
    pub version: &'static str,
}

/// Always 200; callers read `ok` and `status` from the body.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        health: state.manager.health(),
        uptime: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
