//! Record types for the chat history database
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One conversation, keyed by the repository it talks about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: i64,
    pub repo_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Question,
    Answer,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Question => "question",
            MessageType::Answer => "answer",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "question" => Ok(MessageType::Question),
            "answer" => Ok(MessageType::Answer),
            other => Err(other.to_string()),
        }
    }
}

/// A code snippet shown to the user, either attached to an answer or open in
/// a viewer tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultData {
    pub file_path: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl SearchResultData {
    pub fn new(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
            score: None,
            line_start: None,
            line_end: None,
            language: None,
        }
    }
}

/// One question or answer turn.
///
/// `id` and `timestamp` come from the caller and are stored verbatim;
/// `timestamp` is only used as the ordering key on read-back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<SearchResultData>>,
    pub timestamp: String,
}

/// Everything saved for one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub opened_files: Vec<SearchResultData>,
}

impl ChatHistory {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.opened_files.is_empty()
    }
}

/// Row of the sessions overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSession {
    pub repo_path: String,
    pub message_count: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub total_sessions: i64,
    pub total_messages: i64,
    pub total_opened_files: i64,
    pub schema_version: i32,
    pub database_size_bytes: i64,
}

/// Timestamp in the same layout the schema defaults produce, so that
/// lexical and chronological order agree.
pub fn store_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    store_timestamp(Utc::now())
}
