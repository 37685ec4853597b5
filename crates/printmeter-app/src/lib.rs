// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printmeter — metered print submission service.
//
// The service layer wires the document, ledger, and print crates into one
// submission pipeline and owns the background maintenance task.

pub mod services;
