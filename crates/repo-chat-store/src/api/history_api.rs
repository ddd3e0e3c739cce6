//! Per-repository chat history: load, save (full replace) and clear.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::{api_error::ApiError, record_request};
use crate::history_db::{ChatHistory, ChatMessage, SearchResultData};
use crate::metrics;
use crate::shared_state::AppState;

/// Body of a save: the complete new conversation and tab state.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveHistoryRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub opened_files: Vec<SearchResultData>,
}

/// `owner/name` from the wildcard segment, without stray slashes.
pub(crate) fn repo_path_from(raw: &str) -> String {
    raw.trim_matches('/').to_string()
}

/// GET /api/history/*repo
pub async fn get_history(
    State(state): State<AppState>,
    Path(repo): Path<String>,
) -> Result<Json<ChatHistory>, ApiError> {
    let repo_path = repo_path_from(&repo);
    let result = state
        .run_store("get_chat_history", "Failed to fetch chat history", move |db| {
            db.sessions.get_chat_history(&repo_path)
        })
        .await;

    record_request("history_get", &result);
    result.map(Json)
}

/// POST /api/history/*repo
pub async fn save_history(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Json(req): Json<SaveHistoryRequest>,
) -> Result<Json<Value>, ApiError> {
    let repo_path = repo_path_from(&repo);
    info!(
        "Saving {} messages and {} opened files for {}",
        req.messages.len(),
        req.opened_files.len(),
        repo_path
    );

    let message_count = req.messages.len();
    let result = state
        .run_store("save_chat_history", "Failed to save chat history", move |db| {
            db.sessions
                .save_chat_history(&repo_path, &req.messages, &req.opened_files)
        })
        .await;

    record_request("history_save", &result);
    result?;
    metrics::add_saved_messages(message_count);
    Ok(Json(json!({ "success": true })))
}

/// DELETE /api/history/*repo
pub async fn clear_history(
    State(state): State<AppState>,
    Path(repo): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let repo_path = repo_path_from(&repo);
    let result = state
        .run_store("clear_chat_history", "Failed to clear chat history", move |db| {
            db.sessions.clear_chat_history(&repo_path)
        })
        .await;

    record_request("history_clear", &result);
    result?;
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_path_is_trimmed_of_slashes() {
        assert_eq!(repo_path_from("octo/repo"), "octo/repo");
        assert_eq!(repo_path_from("/octo/repo/"), "octo/repo");
        assert_eq!(repo_path_from("/"), "");
    }

    #[test]
    fn test_save_request_defaults_missing_lists() {
        let req: SaveHistoryRequest = serde_json::from_str(r#"{"messages":[]}"#).unwrap();
        assert!(req.opened_files.is_empty());
    }
}
