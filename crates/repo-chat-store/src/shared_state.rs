//! Application state handed to every HTTP handler.

use std::sync::Arc;
use std::time::Instant;

use crate::{
    api::api_error::ApiError,
    history_db::{ChatDatabase, StoreResult},
    metrics::StoreTimer,
};

/// Cloned per request; the database handle is shared.
#[derive(Clone)]
pub struct AppState {
    pub database: Arc<ChatDatabase>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(database: Arc<ChatDatabase>) -> Self {
        Self {
            database,
            started_at: Instant::now(),
        }
    }

    /// Run a blocking store call on the blocking pool, timed under
    /// `operation`. Store errors are mapped with `context` as the client message.
    pub async fn run_store<T, F>(
        &self,
        operation: &'static str,
        context: &'static str,
        f: F,
    ) -> Result<T, ApiError>
    where
        F: FnOnce(&ChatDatabase) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let database = Arc::clone(&self.database);
        tokio::task::spawn_blocking(move || {
            let _timer = StoreTimer::start(operation);
            f(&database)
        })
        .await
        .map_err(|e| ApiError::internal(context, e))?
        .map_err(|e| ApiError::from_store(context, e))
    }
}
