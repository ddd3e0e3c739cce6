use axum::http::StatusCode;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;
use tracing::error;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static STORE_LATENCY: OnceLock<HistogramVec> = OnceLock::new();
static SAVED_MESSAGES: OnceLock<IntCounter> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Create and register the collectors. Until this runs every recorder below
/// is a no-op; calling it again does nothing.
pub fn init_metrics() -> prometheus::Result<()> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    if REQ_COUNTER.get().is_none() {
        let counter = IntCounterVec::new(
            prometheus::opts!("http_requests_total", "Total requests per route"),
            &["route", "status"],
        )?;
        REGISTRY.register(Box::new(counter.clone()))?;
        let _ = REQ_COUNTER.set(counter);
    }

    if STORE_LATENCY.get().is_none() {
        let histogram = HistogramVec::new(
            HistogramOpts::new("store_operation_seconds", "Time spent in session store calls")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0]),
            &["operation"],
        )?;
        REGISTRY.register(Box::new(histogram.clone()))?;
        let _ = STORE_LATENCY.set(histogram);
    }

    if SAVED_MESSAGES.get().is_none() {
        let counter = IntCounter::new("saved_messages_total", "Messages written by history saves")?;
        REGISTRY.register(Box::new(counter.clone()))?;
        let _ = SAVED_MESSAGES.set(counter);
    }

    Ok(())
}

pub fn inc_request(route: &str, status: StatusCode) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status.as_str()]).inc();
    }
}

pub fn add_saved_messages(count: usize) {
    if let Some(counter) = SAVED_MESSAGES.get() {
        counter.inc_by(count as u64);
    }
}

/// Records the elapsed time under `operation` when dropped.
pub struct StoreTimer {
    operation: &'static str,
    started: Instant,
}

impl StoreTimer {
    pub fn start(operation: &'static str) -> Self {
        Self { operation, started: Instant::now() }
    }
}

impl Drop for StoreTimer {
    fn drop(&mut self) {
        if let Some(histogram) = STORE_LATENCY.get() {
            histogram
                .with_label_values(&[self.operation])
                .observe(self.started.elapsed().as_secs_f64());
        }
    }
}

pub async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, [("content-type", "text/plain")], Vec::new());
    }

    (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable_and_records() {
        init_metrics().unwrap();
        init_metrics().unwrap();

        inc_request("history_get", StatusCode::OK);
        add_saved_messages(3);
        drop(StoreTimer::start("get_chat_history"));

        let names: Vec<String> = REGISTRY.gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"http_requests_total".to_string()));
        assert!(names.contains(&"saved_messages_total".to_string()));
        assert!(names.contains(&"store_operation_seconds".to_string()));
    }
}
