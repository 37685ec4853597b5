// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printmeter-ledger — Money bookkeeping for metered printing.
//
// A single SQLite store holds accounts, print job records, the topup audit
// trail, and operator settings.  The ledger debits, refunds, and commits
// print jobs inside one transaction each; the maintenance task credits
// recurring topups and purges aged jobs on a timer.

pub mod ledger;
pub mod maintenance;
pub mod records;
pub mod store;

pub use ledger::{DebitOutcome, DebitRequest, Ledger, normalize_periods};
pub use maintenance::{MaintenanceTask, apply_auto_topups, cleanup_old_prints};
pub use store::Store;
