// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transactional SQLite store shared by the ledger and the maintenance task.
//
// One connection is shared behind a mutex, so transactions are serialised.
// Writers open `BEGIN IMMEDIATE` to take the write lock up front; a closure
// that returns an error rolls its transaction back.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use printmeter_core::error::{PrintmeterError, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info, instrument};

/// Schema for all ledger tables.
const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        balance_cents INTEGER NOT NULL DEFAULT 0,
        daily_topup_cents INTEGER NOT NULL DEFAULT 0,
        monthly_topup_cents INTEGER NOT NULL DEFAULT 0,
        yearly_topup_cents INTEGER NOT NULL DEFAULT 0,
        monthly_limit_cents INTEGER NOT NULL DEFAULT 0,
        yearly_limit_cents INTEGER NOT NULL DEFAULT 0,
        month_spent_cents INTEGER NOT NULL DEFAULT 0,
        year_spent_cents INTEGER NOT NULL DEFAULT 0,
        last_daily_topup TEXT NOT NULL DEFAULT '',
        last_monthly_topup TEXT NOT NULL DEFAULT '',
        last_yearly_topup TEXT NOT NULL DEFAULT '',
        spent_month_key TEXT NOT NULL DEFAULT '',
        spent_year_key TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS print_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        printer_uri TEXT NOT NULL,
        filename TEXT NOT NULL,
        stored_path TEXT NOT NULL,
        file_kind TEXT NOT NULL,
        document_hash TEXT NOT NULL,
        pages INTEGER NOT NULL,
        cost_cents INTEGER NOT NULL,
        balance_before_cents INTEGER NOT NULL,
        balance_after_cents INTEGER NOT NULL,
        month_total_cents INTEGER NOT NULL,
        year_total_cents INTEGER NOT NULL,
        status TEXT NOT NULL,
        dispatch_id TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_print_jobs_created_at ON print_jobs(created_at);

    CREATE TABLE IF NOT EXISTS topups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        amount_cents INTEGER NOT NULL,
        balance_before_cents INTEGER NOT NULL,
        balance_after_cents INTEGER NOT NULL,
        reason TEXT NOT NULL,
        print_job_id INTEGER,
        actor TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

/// Handle to the ledger database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at the given path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| PrintmeterError::PersistenceFailed(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| PrintmeterError::PersistenceFailed(format!("WAL pragma: {e}")))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| PrintmeterError::PersistenceFailed(format!("busy timeout: {e}")))?;

        let store = Self::init(conn)?;
        info!("ledger database opened");
        Ok(store)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PrintmeterError::PersistenceFailed(format!("open in-memory: {e}")))?;
        debug!("in-memory ledger database opened");
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| PrintmeterError::PersistenceFailed(format!("foreign keys: {e}")))?;
        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| PrintmeterError::PersistenceFailed(format!("create tables: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `work` inside one transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back otherwise. Read-only
    /// transactions are deferred; writers take the write lock immediately.
    pub fn with_tx<T>(
        &self,
        read_only: bool,
        work: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| PrintmeterError::PersistenceFailed("store lock poisoned".into()))?;

        let behavior = if read_only {
            TransactionBehavior::Deferred
        } else {
            TransactionBehavior::Immediate
        };
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(|e| PrintmeterError::PersistenceFailed(format!("begin: {e}")))?;

        let value = work(&tx)?;

        tx.commit()
            .map_err(|e| PrintmeterError::PersistenceFailed(format!("commit: {e}")))?;
        Ok(value)
    }

    /// Reclaim free pages and truncate the write-ahead log.
    ///
    /// Runs outside any transaction (`VACUUM` refuses to run inside one).
    #[instrument(skip(self))]
    pub fn compact(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| PrintmeterError::PersistenceFailed("store lock poisoned".into()))?;

        conn.execute_batch("VACUUM;")
            .map_err(|e| PrintmeterError::PersistenceFailed(format!("vacuum: {e}")))?;

        // The checkpoint pragma returns a row (busy, log, checkpointed).
        let (busy, log_frames, checkpointed): (i64, i64, i64) = conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(|e| PrintmeterError::PersistenceFailed(format!("wal checkpoint: {e}")))?;

        debug!(busy, log_frames, checkpointed, "database compacted");
        Ok(())
    }
}
