//! Operational endpoints: liveness, database statistics, maintenance.
use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::api::{api_error::ApiError, record_request};
use crate::history_db::DatabaseStats;
use crate::shared_state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// GET /api/admin/stats
pub async fn db_stats(State(state): State<AppState>) -> Result<Json<DatabaseStats>, ApiError> {
    let result = state
        .run_store("get_stats", "Failed to read database statistics", |db| db.get_stats())
        .await;

    record_request("admin_stats", &result);
    result.map(Json)
}

/// POST /api/admin/maintenance
pub async fn maintenance(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let result = state
        .run_store("run_maintenance", "Database maintenance failed", |db| db.run_maintenance())
        .await;

    record_request("admin_maintenance", &result);
    result?;
    Ok(Json(json!({ "success": true })))
}
