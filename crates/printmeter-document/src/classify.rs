// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// File classifier — assigns an upload to one of the fixed `FileKind`s.
//
// Extension rules win over content sniffing for PDF and office documents:
// office containers are ZIP archives and would otherwise sniff as
// `application/zip`.  Everything else is decided by the first 512 bytes.

use std::io::Read;
use std::path::Path;

use printmeter_core::types::FileKind;
use tracing::{debug, instrument};

/// Number of leading bytes examined by [`sniff_content_type`].
pub const SNIFF_LEN: usize = 512;

/// Extensions routed to the external office converter.
const OFFICE_EXTENSIONS: &[&str] = &["doc", "docx", "ppt", "pptx", "xls", "xlsx"];

/// Extensions treated as text even when their content does not sniff as text.
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "html"];

/// Classify the file at `path`, uploaded under `original_name`.
///
/// Never fails: a file that cannot be opened or read is classified as
/// [`FileKind::Other`], and page counting reports the problem later.
#[instrument(skip_all, fields(name = original_name))]
pub fn classify(path: &Path, original_name: &str) -> FileKind {
    let ext = extension_of(original_name);
    if ext == "pdf" {
        return FileKind::Pdf;
    }
    if is_office_file(original_name) {
        return FileKind::Office;
    }

    let head = match read_head(path) {
        Ok(head) => head,
        Err(err) => {
            debug!(%err, "unreadable upload, classifying as other");
            return FileKind::Other;
        }
    };

    let mime = sniff_content_type(&head);
    let kind = if mime == "application/pdf" {
        FileKind::Pdf
    } else if mime.starts_with("image/") {
        FileKind::Image
    } else if mime.starts_with("text/") || TEXT_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Text
    } else {
        FileKind::Other
    };

    debug!(mime, %kind, "classified upload");
    kind
}

/// Whether the filename carries one of the office document extensions.
pub fn is_office_file(name: &str) -> bool {
    OFFICE_EXTENSIONS.contains(&extension_of(name).as_str())
}

/// Lower-cased extension of `name` without the dot (empty if none).
fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Read up to [`SNIFF_LEN`] bytes from the start of the file.
fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    Ok(head)
}

// ---------------------------------------------------------------------------
// Content sniffing
// ---------------------------------------------------------------------------

/// Markup prefixes that identify an HTML document (matched case-insensitively
/// after leading whitespace, and followed by a space or `>`).
const HTML_PREFIXES: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

/// Guess the MIME type of a document from its leading bytes.
///
/// Recognises the signatures a print service meets in practice (PDF,
/// PostScript, common raster formats, ZIP containers, HTML/XML) and falls back
/// to `text/plain` when the data contains no binary control bytes.
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    // Byte-order marks.
    if data.starts_with(&[0xFE, 0xFF]) {
        return "text/plain; charset=utf-16be";
    }
    if data.starts_with(&[0xFF, 0xFE]) {
        return "text/plain; charset=utf-16le";
    }
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return "text/plain; charset=utf-8";
    }

    // Markup, after leading whitespace.
    let trimmed = trim_leading_whitespace(data);
    if HTML_PREFIXES.iter().any(|prefix| is_html_tag(trimmed, prefix)) {
        return "text/html; charset=utf-8";
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    // Binary signatures.
    if data.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    if data.starts_with(b"%!PS-Adobe-") {
        return "application/postscript";
    }
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png";
    }
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg";
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if data.starts_with(b"BM") {
        return "image/bmp";
    }
    if data.len() >= 14 && data.starts_with(b"RIFF") && &data[8..14] == b"WEBPVP" {
        return "image/webp";
    }
    if data.starts_with(&[0x00, 0x00, 0x01, 0x00]) || data.starts_with(&[0x00, 0x00, 0x02, 0x00])
    {
        return "image/x-icon";
    }
    if data.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }

    if data.iter().any(|&b| is_binary_byte(b)) {
        "application/octet-stream"
    } else {
        "text/plain; charset=utf-8"
    }
}

fn trim_leading_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | 0x0C | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

fn is_html_tag(data: &[u8], prefix: &[u8]) -> bool {
    if data.len() < prefix.len() + 1 {
        return false;
    }
    let matches = data
        .iter()
        .zip(prefix)
        .all(|(&b, &p)| if p.is_ascii_uppercase() { b.to_ascii_uppercase() == p } else { b == p });
    matches && matches!(data[prefix.len()], b' ' | b'>')
}

/// Control bytes that never appear in plain text.
fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
