//! API module - HTTP handlers for chat history and sessions

pub mod admin_api;
pub mod api_error;
pub mod history_api;
pub mod session_api;

use axum::http::StatusCode;

use crate::metrics;
use api_error::ApiError;

pub use history_api::{clear_history, get_history, save_history, SaveHistoryRequest};
pub use session_api::{delete_session, get_sessions};

/// Count the request under `route` with its final status.
pub(crate) fn record_request<T>(route: &str, result: &Result<T, ApiError>) {
    let status = match result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status,
    };
    metrics::inc_request(route, status);
}
