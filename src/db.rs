//! Local SQLite database layer for the cash ledger.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, settings
//! helpers, and shared state (`DbState`) for use across the lifecycle and
//! ledger modules.
//!
//! Breakdown lists on a session (card items, delivery items, extras,
//! attachments, comments) are stored as JSON TEXT columns — sessions and
//! deposit records are flat, self-contained rows with no foreign-key
//! normalization.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{CashError, Result};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection, mapping a poisoned mutex to `CashError::Lock`.
    pub fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CashError::Lock)
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/cashbook.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| CashError::validation(format!("Failed to create data dir: {e}")))?;

    let db_path = data_dir.join("cashbook.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: settings store, cash sessions, deposit records.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- cash_sessions: one per (store, business day)
        CREATE TABLE IF NOT EXISTS cash_sessions (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            business_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            no_movement INTEGER NOT NULL DEFAULT 0,

            opening_value REAL NOT NULL DEFAULT 0,
            previous_close REAL NOT NULL DEFAULT 0,

            cash_notes REAL NOT NULL DEFAULT 0,
            cash_coins REAL NOT NULL DEFAULT 0,
            card_items TEXT NOT NULL DEFAULT '[]',
            delivery_items TEXT NOT NULL DEFAULT '[]',
            extras TEXT NOT NULL DEFAULT '[]',

            closing_cash REAL NOT NULL DEFAULT 0,
            closing_card REAL NOT NULL DEFAULT 0,
            closing_delivery REAL NOT NULL DEFAULT 0,
            closing_total REAL NOT NULL DEFAULT 0,

            deposit_value REAL NOT NULL DEFAULT 0,
            deposit_status TEXT NOT NULL DEFAULT 'pending',

            attachments TEXT NOT NULL DEFAULT '[]',
            comments TEXT NOT NULL DEFAULT '[]',
            opened_by TEXT,
            closed_by TEXT,

            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- deposit_records (append-only)
        CREATE TABLE IF NOT EXISTS deposit_records (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            deposit_date TEXT NOT NULL,
            amount REAL NOT NULL,
            comment TEXT,
            comments TEXT NOT NULL DEFAULT '[]',
            related_entry_ids TEXT NOT NULL DEFAULT '[]',
            created_at TEXT DEFAULT (datetime('now'))
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_cash_sessions_store_date
            ON cash_sessions(store_id, business_date);
        CREATE INDEX IF NOT EXISTS idx_cash_sessions_pending
            ON cash_sessions(store_id, status, deposit_status);
        CREATE INDEX IF NOT EXISTS idx_deposit_records_store
            ON deposit_records(store_id, deposit_date);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        CashError::Storage(e)
    })?;

    info!("Migration v1 applied");
    Ok(())
}

/// Migration v2: enforce the single-open-session-per-(store, day) rule with
/// a partial unique index instead of a pre-insert scan.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE UNIQUE INDEX IF NOT EXISTS uq_cash_sessions_open
            ON cash_sessions(store_id, business_date) WHERE status = 'open';

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        CashError::Storage(e)
    })?;

    info!("Migration v2 applied");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a setting value, or `None` if unset.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// Run migrations against a test connection (used by other modules' tests).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

/// Build a `DbState` over an in-memory database with the full schema applied.
#[cfg(test)]
pub fn test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: list table names in the database.
    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_create_core_tables() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();
        let tables = table_names(&conn);
        for expected in ["local_settings", "cash_sessions", "deposit_records"] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();
        run_migrations(&conn).expect("second run is a no-op");
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_open_session_uniqueness_index() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cash_sessions (id, store_id, business_date, status)
             VALUES ('s1', 'store-1', '2026-08-01', 'open')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO cash_sessions (id, store_id, business_date, status)
             VALUES ('s2', 'store-1', '2026-08-01', 'open')",
            [],
        );
        assert!(dup.is_err(), "second open row for same store/day must fail");

        // A closed row for the same day does not collide with the index
        conn.execute(
            "INSERT INTO cash_sessions (id, store_id, business_date, status)
             VALUES ('s3', 'store-1', '2026-08-01', 'closed')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_settings_roundtrip_and_overwrite() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();
        assert_eq!(get_setting(&conn, "cash", "base_value"), None);

        set_setting(&conn, "cash", "base_value", "150").unwrap();
        assert_eq!(
            get_setting(&conn, "cash", "base_value").as_deref(),
            Some("150")
        );

        set_setting(&conn, "cash", "base_value", "200").unwrap();
        assert_eq!(
            get_setting(&conn, "cash", "base_value").as_deref(),
            Some("200")
        );
    }
}
