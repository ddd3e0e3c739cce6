//! Per-repository chat sessions: messages plus the file viewer's open tabs.
//!
//! Saving is a full replace. Every save deletes the session's messages and
//! opened files and inserts the new sets in one `BEGIN IMMEDIATE`
//! transaction, so readers see either the previous history or the new one.
use crate::history_db::error::{StoreError, StoreResult};
use crate::history_db::schema::*;
use crate::history_db::{run_in_transaction, ConnectionPool, PooledConnection};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SessionStore {
    pool: Arc<ConnectionPool>,
}

impl SessionStore {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> StoreResult<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Id of the session for `repo_path`, creating it if needed. Either way
    /// `updated_at` is set to now.
    pub fn get_or_create_session(&self, repo_path: &str) -> StoreResult<i64> {
        ensure_repo_path(repo_path)?;
        let conn = self.get_conn()?;
        let session_id = upsert_session(&conn, repo_path)?;
        debug!("Resolved session {} for {}", session_id, repo_path);
        Ok(session_id)
    }

    /// Session row for `repo_path`, without refreshing its activity time.
    pub fn get_session(&self, repo_path: &str) -> StoreResult<Option<ChatSession>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, repo_path, created_at, updated_at FROM chat_sessions WHERE repo_path = ?1",
        )?;
        let mut rows = stmt.query([repo_path])?;

        match rows.next()? {
            Some(row) => Ok(Some(row_to_session(row)?)),
            None => Ok(None),
        }
    }

    /// Saved messages (by timestamp) and opened files (by tab order) for
    /// `repo_path`. An unknown repository yields an empty history.
    pub fn get_chat_history(&self, repo_path: &str) -> StoreResult<ChatHistory> {
        let mut conn = self.get_conn()?;
        // One read transaction so a concurrent save is seen whole or not at all.
        let tx = conn.transaction()?;

        let Some(session_id) = find_session_id(&tx, repo_path)? else {
            return Ok(ChatHistory::default());
        };

        let messages = load_messages(&tx, session_id)?;
        let opened_files = load_opened_files(&tx, session_id)?;
        tx.commit()?;

        debug!(
            "Loaded {} messages and {} opened files for {}",
            messages.len(),
            opened_files.len(),
            repo_path
        );
        Ok(ChatHistory { messages, opened_files })
    }

    /// Replace everything stored for `repo_path` with `messages` and
    /// `opened_files`. Tab order is the position in `opened_files`.
    pub fn save_chat_history(
        &self,
        repo_path: &str,
        messages: &[ChatMessage],
        opened_files: &[SearchResultData],
    ) -> StoreResult<()> {
        ensure_repo_path(repo_path)?;

        let encoded_results = messages
            .iter()
            .map(encode_results)
            .collect::<StoreResult<Vec<_>>>()?;

        let mut conn = self.get_conn()?;
        run_in_transaction(&mut conn, |tx| {
            let session_id = upsert_session(tx, repo_path)?;

            tx.execute("DELETE FROM chat_messages WHERE session_id = ?1", [session_id])?;
            tx.execute("DELETE FROM opened_files WHERE session_id = ?1", [session_id])?;

            {
                let mut insert_message = tx.prepare(
                    "INSERT INTO chat_messages (id, session_id, type, content, results, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (message, results) in messages.iter().zip(&encoded_results) {
                    insert_message.execute(params![
                        message.id,
                        session_id,
                        message.kind.as_str(),
                        message.content,
                        results,
                        message.timestamp,
                    ])?;
                }

                let mut insert_file = tx.prepare(
                    "INSERT INTO opened_files
                     (session_id, file_path, content, score, line_start, line_end, language, tab_order)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for (tab_order, file) in opened_files.iter().enumerate() {
                    insert_file.execute(params![
                        session_id,
                        file.file_path,
                        file.content,
                        file.score,
                        file.line_start,
                        file.line_end,
                        file.language,
                        tab_order as i64,
                    ])?;
                }
            }

            tx.execute(
                "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2",
                params![now_timestamp(), session_id],
            )?;
            Ok(())
        })?;

        info!(
            "Saved {} messages and {} opened files for {}",
            messages.len(),
            opened_files.len(),
            repo_path
        );
        Ok(())
    }

    /// Drop the messages and opened files of `repo_path` but keep the
    /// session itself. Unknown repositories are ignored.
    pub fn clear_chat_history(&self, repo_path: &str) -> StoreResult<()> {
        let mut conn = self.get_conn()?;
        run_in_transaction(&mut conn, |tx| {
            if let Some(session_id) = find_session_id(tx, repo_path)? {
                tx.execute("DELETE FROM chat_messages WHERE session_id = ?1", [session_id])?;
                tx.execute("DELETE FROM opened_files WHERE session_id = ?1", [session_id])?;
                info!("Cleared chat history for {}", repo_path);
            }
            Ok(())
        })
    }

    /// All sessions with their message counts, most recently active first.
    pub fn get_all_sessions(&self) -> StoreResult<Vec<RepoSession>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT cs.repo_path, cs.updated_at, COUNT(cm.id) AS message_count
             FROM chat_sessions cs
             LEFT JOIN chat_messages cm ON cs.id = cm.session_id
             GROUP BY cs.id
             ORDER BY cs.updated_at DESC, cs.id DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut sessions = Vec::new();

        while let Some(row) = rows.next()? {
            sessions.push(RepoSession {
                repo_path: row.get(0)?,
                updated_at: parse_stored_datetime(&row.get::<_, String>(1)?),
                message_count: row.get(2)?,
            });
        }

        Ok(sessions)
    }

    /// Remove the session of `repo_path` with all its messages and opened
    /// files. Returns whether a session existed.
    pub fn delete_session(&self, repo_path: &str) -> StoreResult<bool> {
        let mut conn = self.get_conn()?;
        let deleted = run_in_transaction(&mut conn, |tx| {
            let Some(session_id) = find_session_id(tx, repo_path)? else {
                return Ok(false);
            };
            tx.execute("DELETE FROM chat_messages WHERE session_id = ?1", [session_id])?;
            tx.execute("DELETE FROM opened_files WHERE session_id = ?1", [session_id])?;
            tx.execute("DELETE FROM chat_sessions WHERE id = ?1", [session_id])?;
            Ok(true)
        })?;

        if deleted {
            info!("Deleted session for {}", repo_path);
        } else {
            debug!("No session to delete for {}", repo_path);
        }
        Ok(deleted)
    }
}

fn ensure_repo_path(repo_path: &str) -> StoreResult<()> {
    if repo_path.trim().is_empty() {
        return Err(StoreError::EmptyRepoPath);
    }
    Ok(())
}

fn find_session_id(conn: &Connection, repo_path: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM chat_sessions WHERE repo_path = ?1",
        [repo_path],
        |row| row.get(0),
    )
    .optional()
}

/// Insert the session or bump `updated_at` on the existing one, in a single
/// statement so concurrent callers cannot create duplicates.
fn upsert_session(conn: &Connection, repo_path: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "INSERT INTO chat_sessions (repo_path, updated_at) VALUES (?1, ?2)
         ON CONFLICT(repo_path) DO UPDATE SET updated_at = excluded.updated_at
         RETURNING id",
        params![repo_path, now_timestamp()],
        |row| row.get(0),
    )
}

fn encode_results(message: &ChatMessage) -> StoreResult<Option<String>> {
    message
        .results
        .as_ref()
        .map(|results| {
            serde_json::to_string(results).map_err(|source| StoreError::Serialization {
                message_id: message.id.clone(),
                source,
            })
        })
        .transpose()
}

fn load_messages(conn: &Connection, session_id: i64) -> StoreResult<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, type, content, results, timestamp
         FROM chat_messages
         WHERE session_id = ?1
         ORDER BY timestamp ASC, rowid ASC",
    )?;
    let mut rows = stmt.query([session_id])?;
    let mut messages = Vec::new();

    while let Some(row) = rows.next()? {
        messages.push(row_to_message(row)?);
    }

    Ok(messages)
}

fn load_opened_files(conn: &Connection, session_id: i64) -> StoreResult<Vec<SearchResultData>> {
    let mut stmt = conn.prepare(
        "SELECT file_path, content, score, line_start, line_end, language
         FROM opened_files
         WHERE session_id = ?1
         ORDER BY tab_order ASC",
    )?;
    let files = stmt
        .query_map([session_id], |row| {
            Ok(SearchResultData {
                file_path: row.get(0)?,
                content: row.get(1)?,
                score: row.get(2)?,
                line_start: row.get(3)?,
                line_end: row.get(4)?,
                language: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(files)
}

fn row_to_message(row: &Row) -> StoreResult<ChatMessage> {
    let id: String = row.get(0)?;
    let kind_raw: String = row.get(1)?;
    let kind = kind_raw
        .parse::<MessageType>()
        .map_err(|other| StoreError::Deserialization {
            message_id: id.clone(),
            reason: format!("unknown message type `{}`", other),
        })?;

    let results = match row.get::<_, Option<String>>(3)? {
        Some(raw) if !raw.is_empty() => Some(
            serde_json::from_str::<Vec<SearchResultData>>(&raw).map_err(|e| {
                StoreError::Deserialization {
                    message_id: id.clone(),
                    reason: e.to_string(),
                }
            })?,
        ),
        _ => None,
    };

    Ok(ChatMessage {
        id,
        kind,
        content: row.get(2)?,
        results,
        timestamp: row.get(4)?,
    })
}

fn row_to_session(row: &Row) -> StoreResult<ChatSession> {
    Ok(ChatSession {
        id: row.get(0)?,
        repo_path: row.get(1)?,
        created_at: parse_stored_datetime(&row.get::<_, String>(2)?),
        updated_at: parse_stored_datetime(&row.get::<_, String>(3)?),
    })
}

/// Session timestamps are written by the store, but older files may carry
/// SQLite's `CURRENT_TIMESTAMP` layout.
fn parse_stored_datetime(raw: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return DateTime::from_naive_utc_and_offset(dt, Utc);
    }
    warn!("Unparseable session timestamp {:?}, using epoch", raw);
    DateTime::<Utc>::UNIX_EPOCH
}
