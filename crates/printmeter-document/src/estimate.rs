// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page estimation for documents that are not (yet) PDFs.

use std::io::{BufRead, BufReader};
use std::path::Path;

use printmeter_core::error::{PrintmeterError, Result};

/// Lines of plain text that fit on one rendered page.
pub const LINES_PER_PAGE: usize = 60;

/// Clamp a page count so that every billed document costs at least one page.
pub fn clamp_pages(pages: i64) -> i64 {
    pages.max(1)
}

/// Estimate the page count of a plain-text file: `ceil(lines / 60)`, at least 1.
///
/// A trailing line without a newline counts as a line; an empty file is one page.
pub fn estimate_text_pages(path: &Path) -> Result<i64> {
    let file = std::fs::File::open(path).map_err(|e| {
        PrintmeterError::PageCountFailed(format!("cannot open {}: {e}", path.display()))
    })?;

    let mut lines = 0usize;
    for chunk in BufReader::new(file).split(b'\n') {
        chunk.map_err(|e| {
            PrintmeterError::PageCountFailed(format!("cannot read {}: {e}", path.display()))
        })?;
        lines += 1;
    }

    Ok(pages_for_lines(lines))
}

/// Pages needed for `lines` lines of text.
pub fn pages_for_lines(lines: usize) -> i64 {
    clamp_pages(lines.div_ceil(LINES_PER_PAGE) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_file(lines: usize) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        let body: String = (0..lines).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, body).expect("write");
        (dir, path)
    }

    #[test]
    fn empty_file_is_one_page() {
        let (_dir, path) = text_file(0);
        assert_eq!(estimate_text_pages(&path).expect("estimate"), 1);
    }

    #[test]
    fn page_boundaries() {
        let (_dir, path) = text_file(60);
        assert_eq!(estimate_text_pages(&path).expect("estimate"), 1);
        let (_dir, path) = text_file(61);
        assert_eq!(estimate_text_pages(&path).expect("estimate"), 2);
        let (_dir, path) = text_file(121);
        assert_eq!(estimate_text_pages(&path).expect("estimate"), 3);
    }

    #[test]
    fn unterminated_last_line_counts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        let mut body: String = (0..60).map(|i| format!("line {i}\n")).collect();
        body.push_str("tail without newline");
        std::fs::write(&path, body).expect("write");
        assert_eq!(estimate_text_pages(&path).expect("estimate"), 2);
    }

    #[test]
    fn missing_file_is_page_count_failure() {
        let err = estimate_text_pages(Path::new("/nonexistent/notes.txt")).unwrap_err();
        assert!(matches!(err, PrintmeterError::PageCountFailed(_)));
    }

    #[test]
    fn clamp_never_goes_below_one() {
        assert_eq!(clamp_pages(0), 1);
        assert_eq!(clamp_pages(-3), 1);
        assert_eq!(clamp_pages(7), 7);
    }
}
