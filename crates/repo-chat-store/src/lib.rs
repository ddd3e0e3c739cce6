// repo-chat-store/src/lib.rs

pub mod api;
pub mod config;
pub mod history_db;
pub mod metrics;
pub mod server;
pub mod shared_state;
pub mod telemetry;

// Public API exports
pub use config::Config;
pub use history_db::{
    ChatDatabase, ChatHistory, ChatMessage, MessageType, RepoSession, SearchResultData,
    SessionStore, StoreError, StoreResult,
};
pub use server::{build_router, run_server};
pub use shared_state::AppState;
