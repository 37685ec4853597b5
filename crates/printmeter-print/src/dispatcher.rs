// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The dispatch capability shared by both print backends.

use std::future::Future;

use printmeter_core::error::Result;
use printmeter_core::types::PrinterInfo;

/// Everything a backend needs to hand one document to a printer.
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    /// Printer URI (network backend) or installed printer name (spooler).
    pub printer: String,
    /// Print-ready bytes.
    pub document: Vec<u8>,
    /// MIME type sent as `document-format`; empty means octet-stream.
    pub mime_type: String,
    pub user_name: Option<String>,
    pub job_name: Option<String>,
}

/// Send documents to printers and list the printers a host offers.
///
/// Returned futures are `Send` so orchestrators can run them on any
/// runtime worker.
pub trait PrintDispatcher: Send + Sync {
    /// Dispatch one document; resolves to the backend's job identifier.
    fn send(&self, request: DispatchRequest) -> impl Future<Output = Result<String>> + Send;

    /// Printers reachable through `host` (ignored by the local spooler).
    fn list_printers(&self, host: &str) -> impl Future<Output = Result<Vec<PrinterInfo>>> + Send;
}

/// Backend compiled in for this platform.
#[cfg(windows)]
pub type PlatformDispatcher = crate::spooler::SpoolerDispatcher<crate::spooler::WindowsSpooler>;

/// Backend compiled in for this platform.
#[cfg(not(windows))]
pub type PlatformDispatcher = crate::ipp_client::IppDispatcher;

/// Construct the platform backend with default settings.
pub fn platform_dispatcher() -> Result<PlatformDispatcher> {
    #[cfg(windows)]
    {
        Ok(crate::spooler::SpoolerDispatcher::new(
            crate::spooler::WindowsSpooler,
        ))
    }
    #[cfg(not(windows))]
    {
        crate::ipp_client::IppDispatcher::new(crate::ipp_client::DEFAULT_TRANSPORT_TIMEOUT)
    }
}
