//! Sessions overview: list every repository with saved history, delete one.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::{api_error::ApiError, history_api::repo_path_from, record_request};
use crate::history_db::RepoSession;
use crate::metrics;
use crate::shared_state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeleteSessionQuery {
    pub repo: Option<String>,
}

/// GET /api/sessions
pub async fn get_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<RepoSession>>, ApiError> {
    let result = state
        .run_store("get_all_sessions", "Failed to fetch sessions", |db| {
            db.sessions.get_all_sessions()
        })
        .await;

    record_request("sessions_list", &result);
    let sessions = result?;
    info!("Found {} sessions", sessions.len());
    Ok(Json(sessions))
}

/// DELETE /api/sessions?repo=owner/name
///
/// Succeeds whether or not the repository had a session.
pub async fn delete_session(
    State(state): State<AppState>,
    Query(query): Query<DeleteSessionQuery>,
) -> Result<Json<Value>, ApiError> {
    let Some(repo_path) = query
        .repo
        .map(|repo| repo_path_from(&repo))
        .filter(|repo| !repo.trim().is_empty())
    else {
        let err = ApiError::bad_request("Missing repo parameter");
        metrics::inc_request("sessions_delete", err.status);
        return Err(err);
    };

    let result = state
        .run_store("delete_session", "Failed to delete session", move |db| {
            db.sessions.delete_session(&repo_path)
        })
        .await;

    record_request("sessions_delete", &result);
    result?;
    Ok(Json(json!({ "success": true })))
}
