// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF reader — page counting for uploaded and converted PDFs using `lopdf`.

use std::path::Path;

use lopdf::Document;
use printmeter_core::error::{PrintmeterError, Result};
use tracing::{debug, info, instrument};

use crate::estimate::clamp_pages;

/// An opened PDF document.
pub struct PdfReader {
    document: Document,
    /// Source path, if opened from a file (useful for diagnostics).
    source_path: Option<String>,
}

impl PdfReader {
    // -- Construction ---------------------------------------------------------

    /// Open a PDF from the filesystem.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        info!("Opening PDF: {}", path_ref.display());

        let document = Document::load(path_ref).map_err(|err| {
            PrintmeterError::PageCountFailed(format!(
                "failed to open {}: {}",
                path_ref.display(),
                err
            ))
        })?;

        debug!(pages = document.get_pages().len(), "PDF loaded");

        Ok(Self {
            document,
            source_path: Some(path_ref.display().to_string()),
        })
    }

    /// Create a reader from raw PDF bytes already in memory.
    #[instrument(skip_all, fields(bytes_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let document = Document::load_mem(data).map_err(|err| {
            PrintmeterError::PageCountFailed(format!("failed to load PDF from memory: {}", err))
        })?;

        debug!(pages = document.get_pages().len(), "PDF loaded from bytes");

        Ok(Self {
            document,
            source_path: None,
        })
    }

    // -- Inspection -----------------------------------------------------------

    /// Number of pages in the page tree (may be 0 for a degenerate document).
    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// Page count as billed: never below 1.
    pub fn billable_pages(&self) -> i64 {
        clamp_pages(self.page_count() as i64)
    }

    /// Return the source path if the reader was created via [`PdfReader::open`].
    pub fn source_path(&self) -> Option<&str> {
        self.source_path.as_deref()
    }
}

/// Count the billable pages of the PDF at `path`.
pub fn count_pdf_pages(path: &Path) -> Result<i64> {
    Ok(PdfReader::open(path)?.billable_pages())
}
