// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Billing ledger — debit, refund, and commit of print jobs.
//
// Every operation is one store transaction.  Spend counters are normalised to
// the current month/year before any cap is evaluated, and the price per page
// is read inside the same transaction that charges it.

use chrono::{DateTime, Utc};
use printmeter_core::error::{PrintmeterError, Result};
use printmeter_core::types::{
    FileKind, JobStatus, PeriodKeys, PrintRecord, SYSTEM_ACTOR, TopupEntry, TopupReason,
    UserAccount, format_timestamp,
};
use tracing::{debug, info, instrument};

use crate::records::{self, DEFAULT_PER_PAGE_CENTS, PER_PAGE_CENTS_KEY};
use crate::store::Store;

/// Everything needed to charge for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebitRequest {
    pub user_id: i64,
    pub printer_uri: String,
    pub filename: String,
    pub stored_path: String,
    pub file_kind: FileKind,
    pub document_hash: String,
    pub pages: i64,
    pub now: DateTime<Utc>,
}

/// Snapshot after a successful debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebitOutcome {
    pub job_id: i64,
    pub cost_cents: i64,
    pub balance_cents: i64,
    pub month_spent_cents: i64,
    pub year_spent_cents: i64,
}

/// Reset spend counters that belong to an earlier month or year.
///
/// Returns whether anything changed.
pub fn normalize_periods(account: &mut UserAccount, now: DateTime<Utc>) -> bool {
    let keys = PeriodKeys::at(now);
    let mut changed = false;
    if account.spent_month_key != keys.month {
        account.month_spent_cents = 0;
        account.spent_month_key = keys.month;
        changed = true;
    }
    if account.spent_year_key != keys.year {
        account.year_spent_cents = 0;
        account.spent_year_key = keys.year;
        changed = true;
    }
    changed
}

/// Check `cost` against balance, then monthly cap, then yearly cap.
fn check_affordable(account: &UserAccount, cost_cents: i64) -> Result<()> {
    if account.balance_cents < cost_cents {
        return Err(PrintmeterError::InsufficientBalance {
            balance_cents: account.balance_cents,
            cost_cents,
        });
    }
    if account.monthly_limit_cents > 0
        && account.month_spent_cents + cost_cents > account.monthly_limit_cents
    {
        return Err(PrintmeterError::MonthlyLimitExceeded {
            spent_cents: account.month_spent_cents,
            cost_cents,
            limit_cents: account.monthly_limit_cents,
        });
    }
    if account.yearly_limit_cents > 0
        && account.year_spent_cents + cost_cents > account.yearly_limit_cents
    {
        return Err(PrintmeterError::YearlyLimitExceeded {
            spent_cents: account.year_spent_cents,
            cost_cents,
            limit_cents: account.yearly_limit_cents,
        });
    }
    Ok(())
}

/// The billing ledger over a shared [`Store`].
#[derive(Clone)]
pub struct Ledger {
    store: Store,
}

impl Ledger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Current price per page.
    pub fn per_page_cents(&self) -> Result<i64> {
        self.store.with_tx(true, |tx| {
            records::get_setting_int(tx, PER_PAGE_CENTS_KEY, DEFAULT_PER_PAGE_CENTS)
        })
    }

    /// Account as stored (spend counters are not normalised).
    pub fn account(&self, user_id: i64) -> Result<UserAccount> {
        self.store.with_tx(true, |tx| records::require_user(tx, user_id))
    }

    /// Charge `pages × per_page` and insert a `queued` job record.
    ///
    /// On any rejection nothing is written.
    #[instrument(skip(self, request), fields(user_id = request.user_id, pages = request.pages))]
    pub fn debit(&self, request: &DebitRequest) -> Result<DebitOutcome> {
        if request.pages < 1 {
            return Err(PrintmeterError::InvalidRequest(format!(
                "page count must be positive, got {}",
                request.pages
            )));
        }

        let outcome = self.store.with_tx(false, |tx| {
            let mut account = records::require_user(tx, request.user_id)?;
            normalize_periods(&mut account, request.now);

            let per_page = records::get_setting_int(tx, PER_PAGE_CENTS_KEY, DEFAULT_PER_PAGE_CENTS)?;
            let cost_cents = request.pages.checked_mul(per_page).ok_or_else(|| {
                PrintmeterError::InvalidRequest(format!("cost overflow for {} pages", request.pages))
            })?;
            check_affordable(&account, cost_cents)?;

            let balance_before = account.balance_cents;
            account.balance_cents -= cost_cents;
            account.month_spent_cents += cost_cents;
            account.year_spent_cents += cost_cents;
            records::save_user_state(tx, &account)?;

            let job_id = records::insert_print_job(
                tx,
                &PrintRecord {
                    id: 0,
                    user_id: account.id,
                    printer_uri: request.printer_uri.clone(),
                    filename: request.filename.clone(),
                    stored_path: request.stored_path.clone(),
                    file_kind: request.file_kind,
                    document_hash: request.document_hash.clone(),
                    pages: request.pages,
                    cost_cents,
                    balance_before_cents: balance_before,
                    balance_after_cents: account.balance_cents,
                    month_total_cents: account.month_spent_cents,
                    year_total_cents: account.year_spent_cents,
                    status: JobStatus::Queued,
                    dispatch_id: None,
                    created_at: format_timestamp(request.now),
                },
            )?;

            Ok(DebitOutcome {
                job_id,
                cost_cents,
                balance_cents: account.balance_cents,
                month_spent_cents: account.month_spent_cents,
                year_spent_cents: account.year_spent_cents,
            })
        })?;

        info!(
            job_id = outcome.job_id,
            cost_cents = outcome.cost_cents,
            balance_cents = outcome.balance_cents,
            "print job debited"
        );
        Ok(outcome)
    }

    /// Reverse the debit of a `queued` job whose dispatch failed.
    ///
    /// Restores the balance, takes the cost back out of the spend counters
    /// that still belong to the job's month/year, marks the job `failed`, and
    /// appends a `refund` audit entry. Returns the balance after the refund.
    #[instrument(skip(self))]
    pub fn refund(&self, job_id: i64, user_id: i64, cost_cents: i64, now: DateTime<Utc>) -> Result<i64> {
        let balance = self.store.with_tx(false, |tx| {
            let job = records::get_print_job(tx, job_id)?.ok_or(PrintmeterError::JobNotFound(job_id))?;
            if job.user_id != user_id {
                return Err(PrintmeterError::InvalidRequest(format!(
                    "job {job_id} does not belong to user {user_id}"
                )));
            }
            if job.status != JobStatus::Queued {
                return Err(PrintmeterError::InvalidJobState {
                    job_id,
                    status: job.status.to_string(),
                    expected: JobStatus::Queued.to_string(),
                });
            }
            if job.cost_cents != cost_cents {
                return Err(PrintmeterError::InvalidRequest(format!(
                    "refund of {cost_cents} does not match job cost {}",
                    job.cost_cents
                )));
            }

            let mut account = records::require_user(tx, user_id)?;
            normalize_periods(&mut account, now);

            let job_keys = DateTime::parse_from_rfc3339(&job.created_at)
                .map(|at| PeriodKeys::at(at.with_timezone(&Utc)))
                .map_err(|e| {
                    PrintmeterError::PersistenceFailed(format!("job {job_id} timestamp: {e}"))
                })?;
            if account.spent_month_key == job_keys.month {
                account.month_spent_cents = (account.month_spent_cents - cost_cents).max(0);
            }
            if account.spent_year_key == job_keys.year {
                account.year_spent_cents = (account.year_spent_cents - cost_cents).max(0);
            }

            let balance_before = account.balance_cents;
            account.balance_cents += cost_cents;
            records::save_user_state(tx, &account)?;
            records::set_job_status(tx, job_id, JobStatus::Failed, None)?;
            records::insert_topup(
                tx,
                &TopupEntry {
                    id: 0,
                    user_id,
                    amount_cents: cost_cents,
                    balance_before_cents: balance_before,
                    balance_after_cents: account.balance_cents,
                    reason: TopupReason::Refund,
                    print_job_id: Some(job_id),
                    actor: SYSTEM_ACTOR.into(),
                    created_at: format_timestamp(now),
                },
            )?;
            Ok(account.balance_cents)
        })?;

        info!(job_id, cost_cents, balance_cents = balance, "print job refunded");
        Ok(balance)
    }

    /// Mark a `queued` job as printed and record the dispatcher's identifier.
    #[instrument(skip(self))]
    pub fn commit(&self, job_id: i64, dispatch_id: &str) -> Result<()> {
        self.store.with_tx(false, |tx| {
            let job = records::get_print_job(tx, job_id)?.ok_or(PrintmeterError::JobNotFound(job_id))?;
            if job.status != JobStatus::Queued {
                return Err(PrintmeterError::InvalidJobState {
                    job_id,
                    status: job.status.to_string(),
                    expected: JobStatus::Queued.to_string(),
                });
            }
            records::set_job_status(tx, job_id, JobStatus::Printed, Some(dispatch_id))
        })?;
        debug!(job_id, dispatch_id, "print job committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use printmeter_core::types::NewUser;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn ledger_with(user: NewUser) -> (Ledger, i64) {
        let store = Store::open_in_memory().expect("open in-memory db");
        let id = store
            .with_tx(false, |tx| records::create_user(tx, &user, at(2026, 1, 1)))
            .expect("create user");
        (Ledger::new(store), id)
    }

    fn request(user_id: i64, pages: i64, now: DateTime<Utc>) -> DebitRequest {
        DebitRequest {
            user_id,
            printer_uri: "ipp://printer.local/printers/lab".into(),
            filename: "report.pdf".into(),
            stored_path: "20260301/20260301T120000Z_0123456789ab_report.pdf".into(),
            file_kind: FileKind::Pdf,
            document_hash: "ab".repeat(32),
            pages,
            now,
        }
    }

    fn user(balance: i64, monthly: i64, yearly: i64) -> NewUser {
        NewUser {
            username: "alice".into(),
            balance_cents: balance,
            monthly_limit_cents: monthly,
            yearly_limit_cents: yearly,
            ..NewUser::default()
        }
    }

    #[test]
    fn debit_charges_pages_times_price() {
        let (ledger, id) = ledger_with(user(1000, 0, 0));
        let outcome = ledger.debit(&request(id, 3, at(2026, 3, 1))).expect("debit");
        assert_eq!(outcome.cost_cents, 30);
        assert_eq!(outcome.balance_cents, 970);
        assert_eq!(outcome.month_spent_cents, 30);
        assert_eq!(outcome.year_spent_cents, 30);

        let job = ledger
            .store()
            .with_tx(true, |tx| records::get_print_job(tx, outcome.job_id))
            .expect("read")
            .expect("job");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.balance_before_cents, 1000);
        assert_eq!(job.balance_after_cents, 970);
        assert_eq!(job.created_at, "2026-03-01T12:00:00Z");
    }

    #[test]
    fn price_is_read_from_settings() {
        let (ledger, id) = ledger_with(user(1000, 0, 0));
        ledger
            .store()
            .with_tx(false, |tx| records::set_setting(tx, PER_PAGE_CENTS_KEY, "25"))
            .expect("set price");
        assert_eq!(ledger.per_page_cents().expect("price"), 25);
        let outcome = ledger.debit(&request(id, 2, at(2026, 3, 1))).expect("debit");
        assert_eq!(outcome.cost_cents, 50);
    }

    #[test]
    fn insufficient_balance_writes_nothing() {
        let (ledger, id) = ledger_with(user(15, 0, 0));
        let err = ledger.debit(&request(id, 2, at(2026, 3, 1))).unwrap_err();
        assert!(matches!(
            err,
            PrintmeterError::InsufficientBalance { balance_cents: 15, cost_cents: 20 }
        ));

        let account = ledger.account(id).expect("account");
        assert_eq!(account.balance_cents, 15);
        let jobs = ledger
            .store()
            .with_tx(true, |tx| records::list_print_jobs(tx, id))
            .expect("jobs");
        assert!(jobs.is_empty());
    }

    #[test]
    fn exact_balance_is_affordable() {
        let (ledger, id) = ledger_with(user(20, 0, 0));
        let outcome = ledger.debit(&request(id, 2, at(2026, 3, 1))).expect("debit");
        assert_eq!(outcome.balance_cents, 0);
    }

    #[test]
    fn checks_run_balance_then_month_then_year() {
        // Both balance and monthly cap are violated: balance wins.
        let (ledger, id) = ledger_with(user(5, 10, 10));
        assert!(matches!(
            ledger.debit(&request(id, 2, at(2026, 3, 1))),
            Err(PrintmeterError::InsufficientBalance { .. })
        ));

        // Monthly and yearly both violated: monthly wins.
        let (ledger, id) = ledger_with(user(1000, 10, 10));
        assert!(matches!(
            ledger.debit(&request(id, 2, at(2026, 3, 1))),
            Err(PrintmeterError::MonthlyLimitExceeded { limit_cents: 10, .. })
        ));

        // Only the yearly cap is violated.
        let (ledger, id) = ledger_with(user(1000, 0, 10));
        assert!(matches!(
            ledger.debit(&request(id, 2, at(2026, 3, 1))),
            Err(PrintmeterError::YearlyLimitExceeded { limit_cents: 10, .. })
        ));
    }

    #[test]
    fn cap_rejection_leaves_account_and_jobs_untouched() {
        let (ledger, id) = ledger_with(user(100_000, 10_000, 0));
        let seeded = ledger.debit(&request(id, 900, at(2026, 3, 1))).expect("seed spend");
        assert_eq!(seeded.month_spent_cents, 9000);
        let before = ledger.account(id).expect("account");

        let err = ledger.debit(&request(id, 200, at(2026, 3, 15))).unwrap_err();
        assert!(matches!(
            err,
            PrintmeterError::MonthlyLimitExceeded {
                spent_cents: 9000,
                cost_cents: 2000,
                limit_cents: 10_000,
            }
        ));

        let after = ledger.account(id).expect("account");
        assert_eq!(after, before);
        assert_eq!(after.balance_cents, 91_000);
        assert_eq!(after.month_spent_cents, 9000);
        assert_eq!(after.year_spent_cents, 9000);
        let jobs = ledger
            .store()
            .with_tx(true, |tx| records::list_print_jobs(tx, id))
            .expect("jobs");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, seeded.job_id);
    }

    #[test]
    fn monthly_cap_allows_up_to_limit_and_resets_next_month() {
        let (ledger, id) = ledger_with(user(1000, 50, 0));
        ledger.debit(&request(id, 5, at(2026, 3, 1))).expect("at limit");
        assert!(matches!(
            ledger.debit(&request(id, 1, at(2026, 3, 20))),
            Err(PrintmeterError::MonthlyLimitExceeded { spent_cents: 50, .. })
        ));

        let outcome = ledger.debit(&request(id, 1, at(2026, 4, 1))).expect("new month");
        assert_eq!(outcome.month_spent_cents, 10);
        assert_eq!(outcome.year_spent_cents, 60);
    }

    #[test]
    fn year_rollover_resets_both_counters() {
        let (ledger, id) = ledger_with(user(1000, 0, 100));
        ledger.debit(&request(id, 10, at(2026, 12, 31))).expect("december");
        let outcome = ledger.debit(&request(id, 1, at(2027, 1, 1))).expect("january");
        assert_eq!(outcome.month_spent_cents, 10);
        assert_eq!(outcome.year_spent_cents, 10);
    }

    #[test]
    fn normalize_only_touches_stale_keys() {
        let (ledger, id) = ledger_with(user(0, 0, 0));
        let mut account = ledger.account(id).expect("account");
        account.spent_month_key = "2026-03".into();
        account.spent_year_key = "2026".into();
        account.month_spent_cents = 40;
        account.year_spent_cents = 90;

        assert!(!normalize_periods(&mut account, at(2026, 3, 31)));
        assert_eq!(account.month_spent_cents, 40);

        assert!(normalize_periods(&mut account, at(2026, 4, 1)));
        assert_eq!(account.month_spent_cents, 0);
        assert_eq!(account.year_spent_cents, 90);
        assert_eq!(account.spent_month_key, "2026-04");
    }

    #[test]
    fn refund_is_inverse_of_debit() {
        let (ledger, id) = ledger_with(user(1000, 500, 5000));
        let now = at(2026, 3, 1);
        let before = ledger.debit(&request(id, 1, now)).expect("earlier job");
        let outcome = ledger.debit(&request(id, 4, now)).expect("debit");

        let balance = ledger
            .refund(outcome.job_id, id, outcome.cost_cents, now)
            .expect("refund");
        assert_eq!(balance, before.balance_cents);

        let account = ledger.account(id).expect("account");
        assert_eq!(account.balance_cents, before.balance_cents);
        assert_eq!(account.month_spent_cents, before.month_spent_cents);
        assert_eq!(account.year_spent_cents, before.year_spent_cents);

        let (job, topups) = ledger
            .store()
            .with_tx(true, |tx| {
                Ok((records::get_print_job(tx, outcome.job_id)?, records::list_topups(tx, id)?))
            })
            .expect("read");
        assert_eq!(job.expect("job kept").status, JobStatus::Failed);
        assert_eq!(topups.len(), 1);
        assert_eq!(topups[0].reason, TopupReason::Refund);
        assert_eq!(topups[0].amount_cents, 40);
        assert_eq!(topups[0].print_job_id, Some(outcome.job_id));
        assert_eq!(topups[0].actor, SYSTEM_ACTOR);
    }

    #[test]
    fn refund_after_month_rollover_keeps_new_month_counter() {
        let (ledger, id) = ledger_with(user(1000, 0, 0));
        let outcome = ledger.debit(&request(id, 2, at(2026, 3, 31))).expect("debit");
        ledger
            .refund(outcome.job_id, id, outcome.cost_cents, at(2026, 4, 1))
            .expect("refund");
        let account = ledger.account(id).expect("account");
        assert_eq!(account.month_spent_cents, 0);
        assert_eq!(account.spent_month_key, "2026-04");
        // Same year: the yearly counter is decremented.
        assert_eq!(account.year_spent_cents, 0);
        assert_eq!(account.balance_cents, 1000);
    }

    #[test]
    fn refund_requires_queued_job() {
        let (ledger, id) = ledger_with(user(1000, 0, 0));
        let now = at(2026, 3, 1);
        let outcome = ledger.debit(&request(id, 1, now)).expect("debit");
        ledger.commit(outcome.job_id, "job-7").expect("commit");

        let err = ledger.refund(outcome.job_id, id, outcome.cost_cents, now).unwrap_err();
        assert!(matches!(err, PrintmeterError::InvalidJobState { .. }));
        assert_eq!(ledger.account(id).expect("account").balance_cents, 990);

        assert!(matches!(
            ledger.refund(12345, id, 10, now),
            Err(PrintmeterError::JobNotFound(12345))
        ));
    }

    #[test]
    fn double_refund_is_rejected() {
        let (ledger, id) = ledger_with(user(1000, 0, 0));
        let now = at(2026, 3, 1);
        let outcome = ledger.debit(&request(id, 1, now)).expect("debit");
        ledger.refund(outcome.job_id, id, 10, now).expect("first refund");
        assert!(ledger.refund(outcome.job_id, id, 10, now).is_err());
        assert_eq!(ledger.account(id).expect("account").balance_cents, 1000);
    }

    #[test]
    fn commit_records_dispatch_id_once() {
        let (ledger, id) = ledger_with(user(1000, 0, 0));
        let outcome = ledger.debit(&request(id, 1, at(2026, 3, 1))).expect("debit");
        ledger.commit(outcome.job_id, "ipp://printer/jobs/9").expect("commit");

        let job = ledger
            .store()
            .with_tx(true, |tx| records::get_print_job(tx, outcome.job_id))
            .expect("read")
            .expect("job");
        assert_eq!(job.status, JobStatus::Printed);
        assert_eq!(job.dispatch_id.as_deref(), Some("ipp://printer/jobs/9"));

        assert!(matches!(
            ledger.commit(outcome.job_id, "again"),
            Err(PrintmeterError::InvalidJobState { .. })
        ));
    }

    #[test]
    fn non_positive_pages_are_rejected() {
        let (ledger, id) = ledger_with(user(1000, 0, 0));
        assert!(matches!(
            ledger.debit(&request(id, 0, at(2026, 3, 1))),
            Err(PrintmeterError::InvalidRequest(_))
        ));
    }

    #[test]
    fn unknown_user_is_rejected() {
        let (ledger, _) = ledger_with(user(1000, 0, 0));
        assert!(matches!(
            ledger.debit(&request(777, 1, at(2026, 3, 1))),
            Err(PrintmeterError::UserNotFound(777))
        ));
    }
}
