//! Database migration system

use rusqlite::{Connection, OptionalExtension, Result};
use tracing::{error, info, warn};

use crate::history_db::schema::DatabaseStats;

/// Applies the embedded schema migrations in order, once each.
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Bring the schema up to date. Safe to run on every start.
    pub fn initialize_database(&mut self) -> Result<()> {
        info!("Initializing chat history schema...");

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        info!("Current chat history schema version: {}", current_version);

        self.apply_migrations(current_version)
    }

    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version <= current_version {
                continue;
            }
            info!("Applying migration {}...", version);

            let tx = self.conn.transaction()?;
            if let Err(e) = tx.execute_batch(migration_sql) {
                error!("Failed to apply migration {}: {}", version, e);
                return Err(e);
            }
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;

            info!("Migration {} applied successfully", version);
        }

        Ok(())
    }

    pub fn get_current_version(&self) -> Result<i32> {
        current_version(&*self.conn)
    }

    pub fn has_migration_applied(&self, version: i32) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM schema_version WHERE version = ?1",
                [version],
                |_| Ok(1),
            )
            .optional()
            .map(|result| result.is_some())
    }
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![
        (1, include_str!("migrations/001_chat_history.sql")),
        (2, include_str!("migrations/002_session_activity_index.sql")),
    ]
}

/// Highest schema version recorded, or 0 on a fresh file.
pub fn current_version(conn: &Connection) -> Result<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Latest version the embedded migrations produce.
pub fn latest_version() -> i32 {
    get_migrations().last().map(|(version, _)| *version).unwrap_or(0)
}

pub fn get_database_stats(conn: &Connection) -> Result<DatabaseStats> {
    fn table_count(conn: &Connection, table_name: &str) -> Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table_name), [], |row| row.get(0))
    }

    let database_size_bytes: i64 = conn
        .query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )
        .unwrap_or_else(|e| {
            warn!("Failed to read database size: {}", e);
            0
        });

    Ok(DatabaseStats {
        total_sessions: table_count(conn, "chat_sessions")?,
        total_messages: table_count(conn, "chat_messages")?,
        total_opened_files: table_count(conn, "opened_files")?,
        schema_version: current_version(conn)?,
        database_size_bytes,
    })
}

/// Refresh planner statistics. Cheap on a small database.
pub fn run_maintenance(conn: &Connection) -> Result<()> {
    info!("Running database maintenance...");
    conn.execute_batch("ANALYZE; PRAGMA optimize;")?;
    info!("Database maintenance completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |_| Ok(()),
        )
        .optional()
        .unwrap()
        .is_some()
    }

    #[test]
    fn test_initialize_creates_all_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::new(&mut conn).initialize_database().unwrap();

        for table in ["chat_sessions", "chat_messages", "opened_files", "schema_version"] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::new(&mut conn).initialize_database().unwrap();
        MigrationManager::new(&mut conn).initialize_database().unwrap();

        let migrator = MigrationManager::new(&mut conn);
        assert_eq!(migrator.get_current_version().unwrap(), latest_version());
        assert!(migrator.has_migration_applied(1).unwrap());
        assert!(!migrator.has_migration_applied(latest_version() + 1).unwrap());

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, i64::from(latest_version()));
    }

    #[test]
    fn test_stats_on_empty_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::new(&mut conn).initialize_database().unwrap();

        let stats = get_database_stats(&conn).unwrap();
        assert_eq!(stats.total_sessions, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.total_opened_files, 0);
        assert_eq!(stats.schema_version, latest_version());
        run_maintenance(&conn).unwrap();
    }
}
