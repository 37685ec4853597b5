// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer — bridges the request boundary to the printmeter backend crates.
//
// `submission` runs one print job end to end; `app_services` owns the shared
// store, configuration, and maintenance task.

pub mod app_services;
pub mod data_dir;
pub mod submission;
