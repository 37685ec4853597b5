// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Persistent service settings.
///
/// Billing values (price per page, retention window) are not here: they live
/// in the store's settings table so that they are read inside the same
/// transaction that uses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Root directory for uploaded documents and converted artifacts.
    /// Relative paths are resolved against the data directory.
    pub upload_dir: PathBuf,
    /// SQLite database file. Relative paths are resolved against the data directory.
    pub database_path: PathBuf,
    /// TrueType font used to render plain-text uploads.
    pub text_font_path: Option<PathBuf>,
    /// External office converter (LibreOffice `soffice`).
    pub office_converter: PathBuf,
    /// Upper bound for classification plus conversion of one submission.
    pub conversion_timeout_secs: u64,
    /// Interval between auto-topup/retention sweeps.
    pub maintenance_interval_secs: u64,
    /// Printer host used when listing printers (default port 631).
    pub printer_host: String,
}

impl ServiceConfig {
    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            database_path: PathBuf::from("printmeter.db"),
            text_font_path: None,
            office_converter: PathBuf::from("soffice"),
            conversion_timeout_secs: 120,
            maintenance_interval_secs: 3600,
            printer_host: "localhost:631".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{ "conversion_timeout_secs": 30 }"#).unwrap();
        assert_eq!(config.conversion_timeout(), Duration::from_secs(30));
        assert_eq!(config.maintenance_interval(), Duration::from_secs(3600));
        assert_eq!(config.office_converter, PathBuf::from("soffice"));
    }
}
