//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `transactions` - Canonical transaction storage and duplicate lookups
//! - `aggregates` - Monthly aggregate rows and the rebuild journal
//!
//! Multi-statement jobs (imports, rebuilds) run on a single pooled connection inside an
//! explicit SQLite transaction; the `pub(crate)` helpers in the submodules take a
//! `&Connection` so they can participate in one.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{AggregationStats, TIMESTAMP_FORMAT};

mod aggregates;
mod transactions;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

pub(crate) use aggregates::{
    delete_aggregates_except, finish_rebuild_run, load_aggregates, month_totals,
    set_rebuild_phase, start_rebuild_run, update_derived_metrics, upsert_base_aggregate,
    UpsertOutcome,
};
pub(crate) use transactions::{find_duplicate, insert_transaction};

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "TALLY_DB_KEY";

/// A `running` rebuild older than this is treated as abandoned by a dead process
pub const STALE_REBUILD_SECS: i64 = 15 * 60;

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Fixed application salt - changing this would invalidate all existing encrypted databases
    const APP_SALT: &[u8; 16] = b"tally-salt-v1-fx";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite `CURRENT_TIMESTAMP` string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a stored transaction timestamp
pub(crate) fn parse_timestamp_column(s: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
    encrypted: bool,
    /// Keeps a throwaway database's directory alive; removed with the last clone
    scratch: Option<Arc<tempfile::TempDir>>,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `TALLY_DB_KEY` to be set. The database is encrypted with SQLCipher
    /// using a key derived from the passphrase via Argon2.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases.",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", key);

            // Every pooled connection needs the key before its first read
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                conn.busy_timeout(std::time::Duration::from_secs(5))
            });

            Pool::builder().max_size(10).build(manager)?
        } else {
            let manager =
                manager.with_init(|conn| conn.busy_timeout(std::time::Duration::from_secs(5)));
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
            encrypted: passphrase.is_some(),
            scratch: None,
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a file in a temporary directory rather than `:memory:` because each pooled
    /// connection would otherwise see its own empty database. The directory is deleted
    /// when the last clone of the handle is dropped.
    pub fn in_memory() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("tally_test_").tempdir()?;
        let path = dir.path().join("tally.db");
        let path = path.to_string_lossy().into_owned();

        let mut db = Self::new_unencrypted(&path)?;
        db.scratch = Some(Arc::new(dir));
        Ok(db)
    }

    /// Whether the pool was opened with an SQLCipher key
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Store-wide counters and the transaction time span
    pub fn stats(&self) -> Result<AggregationStats> {
        let conn = self.conn()?;

        let (transaction_count, earliest, latest): (i64, Option<String>, Option<String>) = conn
            .query_row(
                "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM transactions",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        let aggregate_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM monthly_aggregates", [], |row| {
                row.get(0)
            })?;

        Ok(AggregationStats {
            transaction_count,
            aggregate_count,
            earliest_ts: earliest
                .as_deref()
                .map(parse_timestamp_column)
                .transpose()?,
            latest_ts: latest.as_deref().map(parse_timestamp_column).transpose()?,
        })
    }

    /// Mark rebuilds left `running` by a crashed process as failed
    ///
    /// Only runs started more than [`STALE_REBUILD_SECS`] ago are touched, so a rebuild
    /// still in progress in another process keeps its journal row. Returns how many were
    /// found; callers should rerun the rebuild when this is non-zero.
    pub fn recover_interrupted_rebuilds(&self) -> Result<usize> {
        self.recover_rebuilds_older_than(STALE_REBUILD_SECS)
    }

    pub(crate) fn recover_rebuilds_older_than(&self, secs: i64) -> Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            r#"UPDATE rebuild_runs SET
                status = 'failed',
                error = 'Interrupted before completion',
                finished_at = CURRENT_TIMESTAMP
            WHERE status = 'running'
              AND started_at <= datetime('now', ?)"#,
            [format!("{:+} seconds", -secs)],
        )?;
        if count > 0 {
            warn!("Found {} interrupted aggregation rebuild(s)", count);
        }
        Ok(count)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- WAL mode: readers don't block the single writer
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Canonical transactions; written only by the importer
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                timestamp DATETIME NOT NULL,                -- YYYY-MM-DD HH:MM:SS
                category TEXT NOT NULL,
                amount REAL NOT NULL CHECK (amount >= 0),   -- magnitude; direction carries sign
                direction TEXT NOT NULL CHECK (direction IN ('income', 'expense')),
                payment_method TEXT,
                counterparty TEXT,
                item TEXT,
                remark TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions(timestamp);
            CREATE INDEX IF NOT EXISTS idx_transactions_signature ON transactions(timestamp, amount);

            -- Derived monthly rows; written only by the aggregation engine
            CREATE TABLE IF NOT EXISTS monthly_aggregates (
                id INTEGER PRIMARY KEY,
                month_key TEXT NOT NULL UNIQUE,             -- YYYY-MM
                housing REAL NOT NULL DEFAULT 0,
                dining REAL NOT NULL DEFAULT 0,
                living REAL NOT NULL DEFAULT 0,
                entertainment REAL NOT NULL DEFAULT 0,
                transportation REAL NOT NULL DEFAULT 0,
                travel REAL NOT NULL DEFAULT 0,
                gifts REAL NOT NULL DEFAULT 0,
                transactions REAL NOT NULL DEFAULT 0,
                social_expenses REAL NOT NULL DEFAULT 0,
                salary REAL NOT NULL DEFAULT 0,
                balance REAL NOT NULL DEFAULT 0,
                avg_consumption REAL NOT NULL DEFAULT 0,
                recent_avg_consumption REAL NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Rebuild journal: a row left 'running' means the process died mid-job
            CREATE TABLE IF NOT EXISTS rebuild_runs (
                id INTEGER PRIMARY KEY,
                scope TEXT NOT NULL,
                phase TEXT NOT NULL DEFAULT 'pending',
                status TEXT NOT NULL DEFAULT 'running',     -- running, completed, failed
                error TEXT,
                started_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                finished_at DATETIME
            );

            CREATE INDEX IF NOT EXISTS idx_rebuild_runs_status ON rebuild_runs(status);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}
