// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Periodic maintenance: recurring auto-topups and the retention janitor.
//
// The task shares nothing with the submission path except the store.  Each
// sweep credits stale topup periods (one transaction per user) and purges job
// records older than the configured retention window together with their
// files.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use printmeter_core::error::{PrintmeterError, Result};
use printmeter_core::types::{
    PeriodKeys, SYSTEM_ACTOR, TopupEntry, TopupReason, UserAccount, format_timestamp,
};
use printmeter_document::UploadStore;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::records::{self, RETENTION_DAYS_KEY};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Auto-topups
// ---------------------------------------------------------------------------

/// Outcome of one auto-topup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopupSweep {
    /// Users that received at least one credit.
    pub users_credited: usize,
    /// Audit entries written.
    pub entries: usize,
    /// Users whose transaction failed.
    pub failures: usize,
}

#[derive(Debug, Clone, Copy)]
enum Period {
    Day,
    Month,
    Year,
}

impl Period {
    const ALL: [Period; 3] = [Period::Day, Period::Month, Period::Year];

    fn reason(self) -> TopupReason {
        match self {
            Period::Day => TopupReason::AutoDaily,
            Period::Month => TopupReason::AutoMonthly,
            Period::Year => TopupReason::AutoYearly,
        }
    }

    fn amount(self, account: &UserAccount) -> i64 {
        match self {
            Period::Day => account.daily_topup_cents,
            Period::Month => account.monthly_topup_cents,
            Period::Year => account.yearly_topup_cents,
        }
    }

    fn key(self, keys: &PeriodKeys) -> &str {
        match self {
            Period::Day => &keys.day,
            Period::Month => &keys.month,
            Period::Year => &keys.year,
        }
    }

    fn marker(self, account: &mut UserAccount) -> &mut String {
        match self {
            Period::Day => &mut account.last_daily_topup,
            Period::Month => &mut account.last_monthly_topup,
            Period::Year => &mut account.last_yearly_topup,
        }
    }
}

/// Credit every configured topup whose period marker is stale.
///
/// Each user is handled in its own transaction; a failure is logged and the
/// sweep moves on. Running the sweep twice within one period credits nothing
/// the second time.
#[instrument(skip(store))]
pub fn apply_auto_topups(store: &Store, now: DateTime<Utc>) -> Result<TopupSweep> {
    let user_ids = store.with_tx(true, |tx| records::list_user_ids(tx))?;
    let keys = PeriodKeys::at(now);
    let mut sweep = TopupSweep::default();

    for user_id in user_ids {
        match store.with_tx(false, |tx| credit_user(tx, user_id, &keys, now)) {
            Ok(0) => {}
            Ok(entries) => {
                sweep.users_credited += 1;
                sweep.entries += entries;
            }
            Err(e) => {
                sweep.failures += 1;
                error!(user_id, error = %e, "auto-topup failed");
            }
        }
    }

    if sweep.entries > 0 || sweep.failures > 0 {
        info!(
            users_credited = sweep.users_credited,
            entries = sweep.entries,
            failures = sweep.failures,
            "auto-topup sweep finished"
        );
    }
    Ok(sweep)
}

fn credit_user(
    tx: &rusqlite::Connection,
    user_id: i64,
    keys: &PeriodKeys,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut account = records::require_user(tx, user_id)?;
    let mut entries = Vec::new();

    for period in Period::ALL {
        let amount = period.amount(&account);
        let key = period.key(keys);
        if amount <= 0 || period.marker(&mut account).as_str() == key {
            continue;
        }

        let before = account.balance_cents;
        account.balance_cents += amount;
        *period.marker(&mut account) = key.to_string();
        entries.push(TopupEntry {
            id: 0,
            user_id,
            amount_cents: amount,
            balance_before_cents: before,
            balance_after_cents: account.balance_cents,
            reason: period.reason(),
            print_job_id: None,
            actor: SYSTEM_ACTOR.into(),
            created_at: format_timestamp(now),
        });
    }

    if entries.is_empty() {
        return Ok(0);
    }

    records::save_user_state(tx, &account)?;
    for entry in &entries {
        records::insert_topup(tx, entry)?;
    }
    debug!(
        user_id,
        credits = entries.len(),
        balance_cents = account.balance_cents,
        "user topped up"
    );
    Ok(entries.len())
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Outcome of one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted_jobs: usize,
    pub removed_files: usize,
}

/// Delete job records created at or before `now − retention_days` and remove
/// their files. A retention of 0 (the default) disables purging.
#[instrument(skip(store, uploads))]
pub fn cleanup_old_prints(
    store: &Store,
    uploads: &UploadStore,
    now: DateTime<Utc>,
) -> Result<CleanupReport> {
    let expired = store.with_tx(false, |tx| {
        let days = records::get_setting_int(tx, RETENTION_DAYS_KEY, 0)?;
        if days <= 0 {
            return Ok(None);
        }
        let window = chrono::Duration::try_days(days).ok_or_else(|| {
            PrintmeterError::InvalidRequest(format!("retention of {days} days is out of range"))
        })?;
        let cutoff = now
            .checked_sub_signed(window)
            .map(format_timestamp)
            .unwrap_or_default();
        records::delete_jobs_created_until(tx, &cutoff).map(Some)
    })?;

    let Some(stored_paths) = expired else {
        return Ok(CleanupReport::default());
    };

    let mut report = CleanupReport {
        deleted_jobs: stored_paths.len(),
        removed_files: 0,
    };
    for rel in &stored_paths {
        report.removed_files += uploads.remove_with_artifacts(rel);
    }

    if report.deleted_jobs > 0 {
        store.compact()?;
        info!(
            deleted_jobs = report.deleted_jobs,
            removed_files = report.removed_files,
            "expired print jobs purged"
        );
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// MaintenanceTask
// ---------------------------------------------------------------------------

/// Combined result of one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub topups: TopupSweep,
    pub cleanup: CleanupReport,
}

/// Cancellable periodic runner for the topup and retention sweeps.
///
/// Sweeps once immediately on [`start`](Self::start) and then every
/// `interval`. Failures are logged and retried on the next tick.
pub struct MaintenanceTask {
    store: Store,
    uploads: UploadStore,
    interval: Duration,
    /// Notification handle used to signal a graceful shutdown.
    shutdown_signal: Arc<Notify>,
    /// Handle to the Tokio task running the sweep loop.
    task_handle: Option<JoinHandle<()>>,
}

impl MaintenanceTask {
    pub fn new(store: Store, uploads: UploadStore, interval: Duration) -> Self {
        Self {
            store,
            uploads,
            interval,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Run both sweeps once at `now`.
    pub fn run_once(&self, now: DateTime<Utc>) -> MaintenanceReport {
        Self::sweep(&self.store, &self.uploads, now)
    }

    fn sweep(store: &Store, uploads: &UploadStore, now: DateTime<Utc>) -> MaintenanceReport {
        let topups = apply_auto_topups(store, now).unwrap_or_else(|e| {
            warn!(error = %e, "auto-topup sweep failed");
            TopupSweep::default()
        });
        let cleanup = cleanup_old_prints(store, uploads, now).unwrap_or_else(|e| {
            warn!(error = %e, "retention sweep failed");
            CleanupReport::default()
        });
        MaintenanceReport { topups, cleanup }
    }

    /// Spawn the sweep loop. Does nothing if it is already running.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("maintenance task already running");
            return;
        }

        let store = self.store.clone();
        let uploads = self.uploads.clone();
        let interval = self.interval;
        let shutdown = Arc::clone(&self.shutdown_signal);

        info!(interval_secs = interval.as_secs(), "maintenance task started");
        self.task_handle = Some(tokio::spawn(async move {
            loop {
                let (s, u) = (store.clone(), uploads.clone());
                let swept =
                    tokio::task::spawn_blocking(move || Self::sweep(&s, &u, Utc::now())).await;
                if let Err(e) = swept {
                    error!(error = %e, "maintenance sweep panicked");
                }

                tokio::select! {
                    _ = shutdown.notified() => {
                        debug!("maintenance loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }));
    }

    /// Signal the loop to exit and wait for it.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.task_handle.take() else {
            return Ok(());
        };
        self.shutdown_signal.notify_one();
        handle
            .await
            .map_err(|e| PrintmeterError::PersistenceFailed(format!("maintenance task join: {e}")))?;
        info!("maintenance task stopped");
        Ok(())
    }
}
