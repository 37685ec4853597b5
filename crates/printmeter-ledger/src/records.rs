// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Typed record operations, one group per table.
//
// Every function takes the connection of an open transaction (`&Transaction`
// derefs to `&Connection`), so callers decide the transaction boundaries.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use printmeter_core::error::{PrintmeterError, Result};
use printmeter_core::types::{
    FileKind, JobStatus, NewUser, PrintRecord, TopupEntry, TopupReason, UserAccount,
    format_timestamp,
};

/// Price per printed page when the setting is absent.
pub const DEFAULT_PER_PAGE_CENTS: i64 = 10;
/// Settings key for the price per page.
pub const PER_PAGE_CENTS_KEY: &str = "per_page_cents";
/// Settings key for the job retention window (0 disables purging).
pub const RETENTION_DAYS_KEY: &str = "retention_days";

fn db_err(context: &str) -> impl FnOnce(rusqlite::Error) -> PrintmeterError + '_ {
    move |e| PrintmeterError::PersistenceFailed(format!("{context}: {e}"))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

const USER_COLUMNS: &str = "id, username, balance_cents, daily_topup_cents, monthly_topup_cents,
    yearly_topup_cents, monthly_limit_cents, yearly_limit_cents, month_spent_cents,
    year_spent_cents, last_daily_topup, last_monthly_topup, last_yearly_topup,
    spent_month_key, spent_year_key";

/// Create an account with empty spend counters and period markers.
pub fn create_user(conn: &Connection, user: &NewUser, now: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (username, balance_cents, daily_topup_cents, monthly_topup_cents,
         yearly_topup_cents, monthly_limit_cents, yearly_limit_cents, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            user.username,
            user.balance_cents,
            user.daily_topup_cents,
            user.monthly_topup_cents,
            user.yearly_topup_cents,
            user.monthly_limit_cents,
            user.yearly_limit_cents,
            format_timestamp(now),
        ],
    )
    .map_err(db_err("insert user"))?;

    let id = conn.last_insert_rowid();
    debug!(user_id = id, username = %user.username, "user created");
    Ok(id)
}

pub fn get_user(conn: &Connection, user_id: i64) -> Result<Option<UserAccount>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![user_id],
        row_to_user,
    )
    .optional()
    .map_err(db_err("get user"))
}

/// Like [`get_user`], but a missing account is an error.
pub fn require_user(conn: &Connection, user_id: i64) -> Result<UserAccount> {
    get_user(conn, user_id)?.ok_or(PrintmeterError::UserNotFound(user_id))
}

pub fn list_user_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare("SELECT id FROM users ORDER BY id")
        .map_err(db_err("prepare list users"))?;
    stmt.query_map([], |row| row.get(0))
        .map_err(db_err("query list users"))?
        .collect::<std::result::Result<Vec<i64>, _>>()
        .map_err(db_err("collect users"))
}

/// Persist balance, spend counters, and period markers of an account.
pub fn save_user_state(conn: &Connection, user: &UserAccount) -> Result<()> {
    let rows = conn
        .execute(
            "UPDATE users SET balance_cents = ?1, month_spent_cents = ?2, year_spent_cents = ?3,
             last_daily_topup = ?4, last_monthly_topup = ?5, last_yearly_topup = ?6,
             spent_month_key = ?7, spent_year_key = ?8
             WHERE id = ?9",
            params![
                user.balance_cents,
                user.month_spent_cents,
                user.year_spent_cents,
                user.last_daily_topup,
                user.last_monthly_topup,
                user.last_yearly_topup,
                user.spent_month_key,
                user.spent_year_key,
                user.id,
            ],
        )
        .map_err(db_err("update user"))?;

    if rows == 0 {
        return Err(PrintmeterError::UserNotFound(user.id));
    }
    Ok(())
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserAccount> {
    Ok(UserAccount {
        id: row.get(0)?,
        username: row.get(1)?,
        balance_cents: row.get(2)?,
        daily_topup_cents: row.get(3)?,
        monthly_topup_cents: row.get(4)?,
        yearly_topup_cents: row.get(5)?,
        monthly_limit_cents: row.get(6)?,
        yearly_limit_cents: row.get(7)?,
        month_spent_cents: row.get(8)?,
        year_spent_cents: row.get(9)?,
        last_daily_topup: row.get(10)?,
        last_monthly_topup: row.get(11)?,
        last_yearly_topup: row.get(12)?,
        spent_month_key: row.get(13)?,
        spent_year_key: row.get(14)?,
    })
}

// ---------------------------------------------------------------------------
// Print jobs
// ---------------------------------------------------------------------------

const JOB_COLUMNS: &str = "id, user_id, printer_uri, filename, stored_path, file_kind,
    document_hash, pages, cost_cents, balance_before_cents, balance_after_cents,
    month_total_cents, year_total_cents, status, dispatch_id, created_at";

/// Insert a job record. The `id` field of `job` is ignored; the new id is returned.
pub fn insert_print_job(conn: &Connection, job: &PrintRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO print_jobs (user_id, printer_uri, filename, stored_path, file_kind,
         document_hash, pages, cost_cents, balance_before_cents, balance_after_cents,
         month_total_cents, year_total_cents, status, dispatch_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            job.user_id,
            job.printer_uri,
            job.filename,
            job.stored_path,
            job.file_kind.as_str(),
            job.document_hash,
            job.pages,
            job.cost_cents,
            job.balance_before_cents,
            job.balance_after_cents,
            job.month_total_cents,
            job.year_total_cents,
            job.status.as_str(),
            job.dispatch_id,
            job.created_at,
        ],
    )
    .map_err(db_err("insert print job"))?;
    Ok(conn.last_insert_rowid())
}

pub fn get_print_job(conn: &Connection, job_id: i64) -> Result<Option<PrintRecord>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM print_jobs WHERE id = ?1"),
        params![job_id],
        row_to_print_job,
    )
    .optional()
    .map_err(db_err("get print job"))
}

/// All job records of a user, newest first.
pub fn list_print_jobs(conn: &Connection, user_id: i64) -> Result<Vec<PrintRecord>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM print_jobs WHERE user_id = ?1 ORDER BY id DESC"
        ))
        .map_err(db_err("prepare list print jobs"))?;
    stmt.query_map(params![user_id], row_to_print_job)
        .map_err(db_err("query list print jobs"))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err("collect print jobs"))
}

/// Move a job to `status`, recording `dispatch_id` when given.
pub fn set_job_status(
    conn: &Connection,
    job_id: i64,
    status: JobStatus,
    dispatch_id: Option<&str>,
) -> Result<()> {
    let rows = conn
        .execute(
            "UPDATE print_jobs SET status = ?1, dispatch_id = COALESCE(?2, dispatch_id)
             WHERE id = ?3",
            params![status.as_str(), dispatch_id, job_id],
        )
        .map_err(db_err("update job status"))?;

    if rows == 0 {
        return Err(PrintmeterError::JobNotFound(job_id));
    }
    Ok(())
}

/// Delete every job created at or before `cutoff`, returning the stored paths
/// of the deleted rows.
pub fn delete_jobs_created_until(conn: &Connection, cutoff: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT stored_path FROM print_jobs WHERE created_at <= ?1")
        .map_err(db_err("prepare expired jobs"))?;
    let paths = stmt
        .query_map(params![cutoff], |row| row.get::<_, String>(0))
        .map_err(db_err("query expired jobs"))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err("collect expired jobs"))?;

    let deleted = conn
        .execute("DELETE FROM print_jobs WHERE created_at <= ?1", params![cutoff])
        .map_err(db_err("delete expired jobs"))?;
    debug!(deleted, "expired print jobs deleted");
    Ok(paths)
}

fn row_to_print_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrintRecord> {
    let kind_tag: String = row.get(5)?;
    let status_tag: String = row.get(13)?;

    let file_kind = FileKind::from_tag(&kind_tag).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown file kind {kind_tag:?}").into(),
        )
    })?;
    let status = JobStatus::from_tag(&status_tag).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            13,
            rusqlite::types::Type::Text,
            format!("unknown job status {status_tag:?}").into(),
        )
    })?;

    Ok(PrintRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        printer_uri: row.get(2)?,
        filename: row.get(3)?,
        stored_path: row.get(4)?,
        file_kind,
        document_hash: row.get(6)?,
        pages: row.get(7)?,
        cost_cents: row.get(8)?,
        balance_before_cents: row.get(9)?,
        balance_after_cents: row.get(10)?,
        month_total_cents: row.get(11)?,
        year_total_cents: row.get(12)?,
        status,
        dispatch_id: row.get(14)?,
        created_at: row.get(15)?,
    })
}

// ---------------------------------------------------------------------------
// Topups
// ---------------------------------------------------------------------------

/// Append an audit entry. The `id` field of `entry` is ignored.
pub fn insert_topup(conn: &Connection, entry: &TopupEntry) -> Result<i64> {
    conn.execute(
        "INSERT INTO topups (user_id, amount_cents, balance_before_cents, balance_after_cents,
         reason, print_job_id, actor, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.user_id,
            entry.amount_cents,
            entry.balance_before_cents,
            entry.balance_after_cents,
            entry.reason.as_str(),
            entry.print_job_id,
            entry.actor,
            entry.created_at,
        ],
    )
    .map_err(db_err("insert topup"))?;
    Ok(conn.last_insert_rowid())
}

/// Audit entries of a user in insertion order.
pub fn list_topups(conn: &Connection, user_id: i64) -> Result<Vec<TopupEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, user_id, amount_cents, balance_before_cents, balance_after_cents,
                    reason, print_job_id, actor, created_at
             FROM topups WHERE user_id = ?1 ORDER BY id ASC",
        )
        .map_err(db_err("prepare list topups"))?;
    stmt.query_map(params![user_id], |row| {
        let reason_tag: String = row.get(5)?;
        let reason = TopupReason::from_tag(&reason_tag).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("unknown topup reason {reason_tag:?}").into(),
            )
        })?;
        Ok(TopupEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            amount_cents: row.get(2)?,
            balance_before_cents: row.get(3)?,
            balance_after_cents: row.get(4)?,
            reason,
            print_job_id: row.get(6)?,
            actor: row.get(7)?,
            created_at: row.get(8)?,
        })
    })
    .map_err(db_err("query list topups"))?
    .collect::<std::result::Result<Vec<_>, _>>()
    .map_err(db_err("collect topups"))
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Integer setting, or `default` when absent or not an integer.
pub fn get_setting_int(conn: &Connection, key: &str, default: i64) -> Result<i64> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(db_err("get setting"))?;

    Ok(value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default))
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )
    .map_err(db_err("set setting"))?;
    Ok(())
}
