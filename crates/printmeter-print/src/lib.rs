// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printmeter Print — hands finished documents to printers.  Two backends
// share the `PrintDispatcher` capability: a hand-encoded IPP client for
// network printers and the native Windows spooler.  Exactly one is compiled
// in as `PlatformDispatcher`.

pub mod dispatcher;
pub mod ipp_client;
pub mod ipp_codec;
pub mod spooler;

pub use dispatcher::{DispatchRequest, PlatformDispatcher, PrintDispatcher, platform_dispatcher};
pub use ipp_client::IppDispatcher;
pub use spooler::{SpoolerApi, SpoolerDispatcher};
