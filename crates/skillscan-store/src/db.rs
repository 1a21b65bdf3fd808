//! SQLite handle for the local SkillScan state.
//!
//! [`Database`] wraps one `rusqlite::Connection` behind an `Arc<Mutex<>>`.
//! Every async accessor hops onto the blocking pool with
//! `tokio::task::spawn_blocking`, so install requests running on the async
//! runtime never block on disk I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// File name of the state database inside the data directory.
pub const DB_FILE_NAME: &str = "skillscan.db";

/// Thread-safe handle to the state database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path`.
    ///
    /// Blocks on file I/O; prefer [`Database::open_and_migrate`] from async
    /// code.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening state database");

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests and throwaway runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory state database");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open `path` on the blocking pool and bring the schema up to date.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Apply any pending schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(migration::run_all).await
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// ```ignore
    /// let rows: i64 = db
    ///     .execute(|conn| Ok(conn.query_row("SELECT count(*) FROM scan_cache", [], |r| r.get(0))?))
    ///     .await?;
    /// ```
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }

    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        // WAL lets a second process (another agent) read while we write.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        // Wait for a concurrent writer instead of failing with SQLITE_BUSY.
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        debug!("state database pragmas applied");
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_works() {
        let db = Database::open_in_memory().unwrap();
        let version: String = db
            .execute(|conn| {
                let v: String = conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
                Ok(v)
            })
            .await
            .unwrap();
        assert!(!version.is_empty());
    }

    #[tokio::test]
    async fn migrations_create_state_tables() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();

        let tables: Vec<String> = db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .unwrap();

        assert!(tables.contains(&"credential".to_string()));
        assert!(tables.contains(&"scan_cache".to_string()));
    }

    #[tokio::test]
    async fn execute_surfaces_sql_errors() {
        let db = Database::open_in_memory().unwrap();
        let result: StoreResult<i64> = db
            .execute(|conn| Ok(conn.query_row("SELECT * FROM nope", [], |row| row.get(0))?))
            .await;
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
    }
}
