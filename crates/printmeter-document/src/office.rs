// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Office document conversion through an external LibreOffice process.
//
// Each call gets its own temporary directory holding both the output PDF and a
// throwaway LibreOffice profile, so concurrent conversions never share state.
// The directory is removed when the call returns, fails, or is cancelled.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use printmeter_core::error::{PrintmeterError, Result};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Runs `soffice --headless --convert-to pdf` with a bounded timeout.
#[derive(Debug, Clone)]
pub struct OfficeConverter {
    binary: PathBuf,
    timeout: Duration,
}

impl OfficeConverter {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Convert `input` to PDF and return the PDF bytes.
    ///
    /// Fails with `ConversionFailed` when the process cannot be spawned, exits
    /// unsuccessfully, exceeds the timeout, or produces no output file. The
    /// child is killed if the returned future is dropped.
    #[instrument(skip(self), fields(input = %input.display(), binary = %self.binary.display()))]
    pub async fn convert_to_pdf(&self, input: &Path) -> Result<Vec<u8>> {
        let workdir = tempfile::Builder::new()
            .prefix("printmeter-office-")
            .tempdir()
            .map_err(|e| PrintmeterError::ConversionFailed(format!("temp dir: {e}")))?;
        let profile = workdir.path().join("profile");

        let mut command = Command::new(&self.binary);
        command
            .arg(format!("-env:UserInstallation=file://{}", profile.display()))
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(workdir.path())
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(timeout_secs = self.timeout.as_secs(), "Starting office conversion");

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                warn!("office conversion timed out");
                return Err(PrintmeterError::ConversionFailed(format!(
                    "office conversion timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
            Ok(Err(e)) => {
                return Err(PrintmeterError::ConversionFailed(format!(
                    "cannot run {}: {e}",
                    self.binary.display()
                )));
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PrintmeterError::ConversionFailed(format!(
                "office converter exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stem = input
            .file_stem()
            .ok_or_else(|| PrintmeterError::ConversionFailed("input has no file name".into()))?;
        let produced = workdir
            .path()
            .join(format!("{}.pdf", stem.to_string_lossy()));

        let pdf = tokio::fs::read(&produced).await.map_err(|e| {
            PrintmeterError::ConversionFailed(format!(
                "office converter produced no PDF at {}: {e}",
                produced.display()
            ))
        })?;

        debug!(pdf_bytes = pdf.len(), "Office conversion finished");
        Ok(pdf)
    }
}
