//! HTTP server startup
//!
//! The chat history database is opened once as the process-wide shared
//! handle, every handler reaches it through `AppState`, and the handle is
//! released after the server drains on shutdown.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    config::Config,
    history_db::{self, ChatDatabase},
    shared_state::AppState,
};

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    if let Err(e) = crate::metrics::init_metrics() {
        warn!("Failed to register metrics: {}. /metrics will be empty.", e);
    }
    cfg.print_config();

    let database: Arc<ChatDatabase> =
        history_db::open_shared_with_options(&cfg.db_path, cfg.database_options())?;
    info!("Chat history database ready at: {}", cfg.db_path.display());

    let state = AppState::new(database);
    let addr = cfg.api_addr()?;

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(state, cfg.request_timeout(), cfg.max_body_bytes);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    history_db::close_shared();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining requests"),
        Err(e) => {
            warn!("Unable to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Every route of the service. Request bodies larger than `max_body_bytes`
/// are refused with 413 before any handler runs.
pub fn build_router(state: AppState, request_timeout: Duration, max_body_bytes: usize) -> axum::Router {
    use axum::{
        extract::DefaultBodyLimit,
        routing::{get, post},
        Router,
    };
    use tower_http::{
        cors::{Any, CorsLayer},
        limit::RequestBodyLimitLayer,
        timeout::TimeoutLayer,
        trace::TraceLayer,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/history/*repo",
            get(crate::api::history_api::get_history)
                .post(crate::api::history_api::save_history)
                .delete(crate::api::history_api::clear_history),
        )
        .route(
            "/api/sessions",
            get(crate::api::session_api::get_sessions).delete(crate::api::session_api::delete_session),
        )
        .route("/api/admin/health", get(crate::api::admin_api::health))
        .route("/api/admin/stats", get(crate::api::admin_api::db_stats))
        .route("/api/admin/maintenance", post(crate::api::admin_api::maintenance))
        .route("/metrics", get(crate::metrics::get_metrics))
        .route("/healthz", get(|| async { "OK" }))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_router() -> (axum::Router, Arc<ChatDatabase>) {
        test_router_with_limit(64 * 1024 * 1024)
    }

    fn test_router_with_limit(max_body_bytes: usize) -> (axum::Router, Arc<ChatDatabase>) {
        let database = Arc::new(ChatDatabase::new_in_memory().unwrap());
        let router = build_router(
            AppState::new(Arc::clone(&database)),
            Duration::from_secs(5),
            max_body_bytes,
        );
        (router, database)
    }

    async fn send(router: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => {
                let body = body.to_string();
                builder
                    .header("content-type", "application/json")
                    .header("content-length", body.len())
                    .body(Body::from(body))
                    .unwrap()
            }
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_unknown_repo_history_is_empty() {
        let (router, _db) = test_router();

        let (status, body) = send(&router, "GET", "/api/history/never/saved", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"messages": [], "openedFiles": []}));
    }

    #[tokio::test]
    async fn test_save_then_load_history() {
        let (router, db) = test_router();
        let payload = json!({
            "messages": [
                {"id": "1", "type": "question", "content": "hi", "timestamp": "2024-01-01T00:00:00Z"}
            ],
            "openedFiles": [
                {"file_path": "x.ts", "content": "...", "line_start": 1, "line_end": 5}
            ]
        });

        let (status, body) = send(&router, "POST", "/api/history/a/b", Some(payload.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let (status, body) = send(&router, "GET", "/api/history/a/b", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, payload);
        assert!(db.sessions.get_session("a/b").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sessions_list_and_delete() {
        let (router, _db) = test_router();
        let payload = json!({
            "messages": [
                {"id": "1", "type": "question", "content": "hi", "timestamp": "2024-01-01T00:00:00Z"}
            ],
            "openedFiles": []
        });
        send(&router, "POST", "/api/history/a/b", Some(payload)).await;

        let (status, body) = send(&router, "GET", "/api/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["repo_path"], "a/b");
        assert_eq!(body[0]["message_count"], 1);
        assert!(body[0]["updated_at"].is_string());

        let (status, body) = send(&router, "DELETE", "/api/sessions?repo=a%2Fb", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let (_, body) = send(&router, "GET", "/api/sessions", None).await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_delete_unknown_session_still_succeeds() {
        let (router, _db) = test_router();

        let (status, body) = send(&router, "DELETE", "/api/sessions?repo=never/saved", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
    }

    #[tokio::test]
    async fn test_delete_without_repo_is_bad_request() {
        let (router, _db) = test_router();

        let (status, body) = send(&router, "DELETE", "/api/sessions", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing repo parameter");
    }

    #[tokio::test]
    async fn test_clear_history_keeps_session_listed() {
        let (router, _db) = test_router();
        let payload = json!({
            "messages": [
                {"id": "1", "type": "answer", "content": "ok", "timestamp": "2024-01-01T00:00:00Z", "results": []}
            ],
            "openedFiles": [{"file_path": "a.rs", "content": "a"}]
        });
        send(&router, "POST", "/api/history/a/b", Some(payload)).await;

        let (status, _) = send(&router, "DELETE", "/api/history/a/b", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, history) = send(&router, "GET", "/api/history/a/b", None).await;
        assert_eq!(history, json!({"messages": [], "openedFiles": []}));
        let (_, sessions) = send(&router, "GET", "/api/sessions", None).await;
        assert_eq!(sessions[0]["message_count"], 0);
    }

    #[tokio::test]
    async fn test_corrupt_history_is_a_server_error() {
        let (router, db) = test_router();
        let payload = json!({
            "messages": [
                {"id": "1", "type": "question", "content": "hi", "timestamp": "2024-01-01T00:00:00Z"}
            ]
        });
        send(&router, "POST", "/api/history/a/b", Some(payload)).await;
        db.with_transaction(|tx| {
            tx.execute("UPDATE chat_messages SET results = 'nope'", [])?;
            Ok(())
        })
        .unwrap();

        let (status, body) = send(&router, "GET", "/api/history/a/b", None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to fetch chat history");
    }

    #[tokio::test]
    async fn test_invalid_message_type_is_rejected() {
        let (router, _db) = test_router();
        let payload = json!({
            "messages": [
                {"id": "1", "type": "system", "content": "hi", "timestamp": "2024-01-01T00:00:00Z"}
            ]
        });

        let (status, _) = send(&router, "POST", "/api/history/a/b", Some(payload)).await;

        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_admin_stats_and_health() {
        let (router, _db) = test_router();
        send(
            &router,
            "POST",
            "/api/history/a/b",
            Some(json!({"messages": [], "openedFiles": [{"file_path": "a.rs", "content": "a"}]})),
        )
        .await;

        let (status, stats) = send(&router, "GET", "/api/admin/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_sessions"], 1);
        assert_eq!(stats["total_opened_files"], 1);

        let (status, health) = send(&router, "GET", "/api/admin/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "healthy");

        let (status, _) = send(&router, "POST", "/api/admin/maintenance", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_save_larger_than_two_megabytes() {
        let (router, db) = test_router();
        let big_file = "x".repeat(3 * 1024 * 1024);
        let payload = json!({
            "messages": [],
            "openedFiles": [{"file_path": "big.ts", "content": big_file}]
        });

        let (status, body) = send(&router, "POST", "/api/history/a/b", Some(payload)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
        let history = db.sessions.get_chat_history("a/b").unwrap();
        assert_eq!(history.opened_files[0].content.len(), 3 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_body_over_configured_limit_is_refused() {
        let (router, db) = test_router_with_limit(1024);
        let payload = json!({
            "messages": [],
            "openedFiles": [{"file_path": "big.ts", "content": "x".repeat(4096)}]
        });

        let (status, _) = send(&router, "POST", "/api/history/a/b", Some(payload)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(db.sessions.get_session("a/b").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_session_ignores_surrounding_slashes() {
        let (router, db) = test_router();
        send(
            &router,
            "POST",
            "/api/history/a/b/",
            Some(json!({"messages": [], "openedFiles": []})),
        )
        .await;
        assert!(db.sessions.get_session("a/b").unwrap().is_some());

        let (status, body) = send(&router, "DELETE", "/api/sessions?repo=/a/b/", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
        assert!(db.sessions.get_all_sessions().unwrap().is_empty());
    }
}
