//! Versioned schema migrations.
//!
//! Each migration is a static SQL batch with a version number. Applied
//! versions are recorded in `_migrations`, so opening an existing database
//! only runs what is new.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Append new migrations at the end; never edit an applied one.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "credential: single-row API key and plan metadata",
        sql: r#"
            CREATE TABLE credential (
                id              INTEGER PRIMARY KEY CHECK (id = 1),
                api_key         TEXT NOT NULL,
                plan            TEXT NOT NULL CHECK (plan IN ('FREE','PAY_PER_SCAN','PRO')),
                scans_remaining INTEGER,
                updated_at      INTEGER NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        description: "scan_cache: verdicts keyed by normalized skill identifier",
        sql: r#"
            CREATE TABLE scan_cache (
                skill_key   TEXT PRIMARY KEY,
                source      TEXT NOT NULL,
                verdict     TEXT NOT NULL,
                obtained_at INTEGER NOT NULL
            );
            CREATE INDEX idx_scan_cache_obtained ON scan_cache(obtained_at);
        "#,
    },
];

/// Apply every migration newer than the recorded version.
///
/// Synchronous; call it through [`crate::Database::execute`].
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "state schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "migrating state schema"
    );

    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Latest applied migration version, or 0 for a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to read current version: {e}"),
    })
}

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    let fail = |stage: &str, e: rusqlite::Error| StoreError::Migration {
        version: migration.version,
        message: format!("{stage}: {e}"),
    };

    // Dropping `tx` without commit rolls the batch back.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| fail("begin", e))?;
    if let Err(e) = tx.execute_batch(migration.sql) {
        warn!(version = migration.version, error = %e, "migration failed, rolling back");
        return Err(fail("sql", e));
    }
    tx.execute(
        "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.description,
            chrono::Utc::now().timestamp()
        ],
    )
    .map_err(|e| fail("record", e))?;
    tx.commit().map_err(|e| fail("commit", e))
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const LATEST_VERSION: u32 = 2;

    #[test]
    fn versions_strictly_increase() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[1].version > pair[0].version);
        }
        assert_eq!(MIGRATIONS.last().map(|m| m.version), Some(LATEST_VERSION));
    }

    #[test]
    fn fresh_db_reaches_latest() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn rerun_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT count(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, i64::from(LATEST_VERSION));
    }

    #[test]
    fn credential_table_holds_one_row() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO credential (id, api_key, plan, scans_remaining, updated_at)
             VALUES (1, 'k', 'FREE', 5, 0)",
            [],
        )
        .unwrap();
        let second = conn.execute(
            "INSERT INTO credential (id, api_key, plan, scans_remaining, updated_at)
             VALUES (2, 'k2', 'FREE', 5, 0)",
            [],
        );
        assert!(second.is_err());
    }
}
