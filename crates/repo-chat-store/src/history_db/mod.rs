//! Chat history database - SQLite-backed storage for per-repository conversations
pub mod error;
pub mod migration;
pub mod schema;
pub mod session_store;
pub use error::{StoreError, StoreResult};
pub use migration::MigrationManager;
pub use schema::*;
pub use session_store::SessionStore;
use lazy_static::lazy_static;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::TransactionBehavior;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub type ConnectionPool = Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const DEFAULT_POOL_SIZE: u32 = 8;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

lazy_static! {
    static ref SHARED_DATABASE: Mutex<Option<Arc<ChatDatabase>>> = Mutex::new(None);
}

/// Connection settings for [`ChatDatabase::with_options`].
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub pool_size: u32,
    pub busy_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Owner of the connection pool and entry point to the session store.
pub struct ChatDatabase {
    pub sessions: SessionStore,
    pool: Arc<ConnectionPool>,
}

impl ChatDatabase {
    pub fn new(db_path: &Path) -> StoreResult<Self> {
        Self::with_options(db_path, DatabaseOptions::default())
    }

    /// Open (or create) the database file, apply migrations and switch to WAL.
    pub fn with_options(db_path: &Path, options: DatabaseOptions) -> StoreResult<Self> {
        info!("Opening chat history database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let busy_timeout = options.busy_timeout;
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(move |conn| {
                conn.busy_timeout(busy_timeout)?;
                conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")
            });
        let pool = Pool::builder().max_size(options.pool_size.max(1)).build(manager)?;

        {
            let mut conn = pool.get()?;
            let journal_mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            if !journal_mode.eq_ignore_ascii_case("wal") {
                warn!("SQLite refused WAL journaling, running in {} mode", journal_mode);
            }
            MigrationManager::new(&mut conn).initialize_database()?;
        }

        info!("Chat history database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool)))
    }

    /// Private in-memory database. The pool holds a single connection because
    /// every SQLite memory connection is its own database.
    pub fn new_in_memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(Arc::new(pool)))
    }

    fn from_pool(pool: Arc<ConnectionPool>) -> Self {
        Self {
            sessions: SessionStore::new(Arc::clone(&pool)),
            pool,
        }
    }

    pub fn connection(&self) -> StoreResult<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction; commits on `Ok`, rolls
    /// back on `Err`.
    pub fn with_transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> StoreResult<T>,
    {
        let mut conn = self.connection()?;
        run_in_transaction(&mut conn, f)
    }

    pub fn get_stats(&self) -> StoreResult<DatabaseStats> {
        let conn = self.connection()?;
        Ok(migration::get_database_stats(&conn)?)
    }

    pub fn run_maintenance(&self) -> StoreResult<()> {
        let conn = self.connection()?;
        Ok(migration::run_maintenance(&conn)?)
    }
}

impl Drop for ChatDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

/// Shared by [`ChatDatabase::with_transaction`] and the session store.
pub(crate) fn run_in_transaction<T, F>(conn: &mut rusqlite::Connection, f: F) -> StoreResult<T>
where
    F: FnOnce(&rusqlite::Transaction<'_>) -> StoreResult<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    // Dropping an uncommitted rusqlite transaction rolls it back.
    let result = f(&tx)?;
    tx.commit()?;
    Ok(result)
}

/// Process-wide database handle, opened on first call. Later calls return the
/// same handle whatever path they pass.
pub fn open_shared(db_path: &Path) -> StoreResult<Arc<ChatDatabase>> {
    open_shared_with_options(db_path, DatabaseOptions::default())
}

/// Like [`open_shared`] with explicit pool settings for the first open.
pub fn open_shared_with_options(
    db_path: &Path,
    options: DatabaseOptions,
) -> StoreResult<Arc<ChatDatabase>> {
    let mut guard = SHARED_DATABASE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(db) = guard.as_ref() {
        return Ok(Arc::clone(db));
    }
    let db = Arc::new(ChatDatabase::with_options(db_path, options)?);
    *guard = Some(Arc::clone(&db));
    Ok(db)
}

/// Release the process-wide handle. The database closes once the last clone
/// held by in-flight requests is dropped. Returns false if nothing was open.
pub fn close_shared() -> bool {
    let mut guard = SHARED_DATABASE.lock().unwrap_or_else(|e| e.into_inner());
    let closed = guard.take().is_some();
    if closed {
        debug!("Shared chat history database released");
    }
    closed
}
