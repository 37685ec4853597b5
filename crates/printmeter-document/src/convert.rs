// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Conversion pipeline — turns a classified upload into a page count and, for
// kinds that are not printed as-is, a print-ready PDF.
//
//   pdf    → counted with lopdf, printed as-is
//   image  → one A4 page, fitted and centred
//   text   → rendered 60 lines per page with the configured TrueType font
//   office → converted by LibreOffice, then counted like a PDF
//   other  → one page (estimate), printed as-is
//
// CPU-bound work runs on the blocking pool so the runtime stays responsive.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use printmeter_core::error::{PrintmeterError, Result};
use printmeter_core::types::FileKind;
use tracing::{debug, info, instrument};

use crate::estimate::{clamp_pages, estimate_text_pages};
use crate::office::OfficeConverter;
use crate::pdf::reader::{PdfReader, count_pdf_pages};
use crate::pdf::writer::PdfWriter;

/// Result of preparing a document for billing and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDocument {
    pub kind: FileKind,
    /// Billable page count, always at least 1.
    pub pages: i64,
    /// Whether `pages` is an estimate rather than an exact count.
    pub is_estimate: bool,
    /// Print-ready PDF for converted kinds; `None` means dispatch the original.
    pub pdf: Option<Vec<u8>>,
}

/// Page count for a document that is only being quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCount {
    pub pages: i64,
    pub is_estimate: bool,
}

/// Converts and counts documents.
#[derive(Debug, Clone)]
pub struct ConversionPipeline {
    office: OfficeConverter,
    font_path: Option<PathBuf>,
}

impl ConversionPipeline {
    pub fn new(office: OfficeConverter, font_path: Option<PathBuf>) -> Self {
        Self { office, font_path }
    }

    /// Convert (where needed) and count the document at `path`.
    #[instrument(skip(self), fields(path = %path.display(), %kind))]
    pub async fn prepare(&self, path: &Path, kind: FileKind) -> Result<PreparedDocument> {
        let prepared = match kind {
            FileKind::Pdf => {
                let owned = path.to_path_buf();
                let pages = blocking(move || count_pdf_pages(&owned)).await?;
                PreparedDocument { kind, pages, is_estimate: false, pdf: None }
            }
            FileKind::Image => {
                let bytes = tokio::fs::read(path).await?;
                let pdf = blocking(move || PdfWriter::a4().create_from_image(&bytes)).await?;
                PreparedDocument { kind, pages: 1, is_estimate: false, pdf: Some(pdf) }
            }
            FileKind::Text => {
                let font = self.load_font().await?;
                let owned = path.to_path_buf();
                let (pages, pdf) = blocking(move || {
                    let pages = estimate_text_pages(&owned)?;
                    let lines = read_text_lines(&owned)?;
                    let pdf = PdfWriter::a4().create_from_text_lines(&lines, &font)?;
                    Ok((pages, pdf))
                })
                .await?;
                PreparedDocument { kind, pages, is_estimate: true, pdf: Some(pdf) }
            }
            FileKind::Office => {
                let pdf = self.office.convert_to_pdf(path).await?;
                let (pdf, pages) = blocking(move || {
                    let pages = PdfReader::from_bytes(&pdf)?.billable_pages();
                    Ok((pdf, pages))
                })
                .await?;
                PreparedDocument { kind, pages, is_estimate: false, pdf: Some(pdf) }
            }
            FileKind::Other => PreparedDocument { kind, pages: 1, is_estimate: true, pdf: None },
        };

        info!(pages = prepared.pages, estimate = prepared.is_estimate, "Document prepared");
        Ok(PreparedDocument {
            pages: clamp_pages(prepared.pages),
            ..prepared
        })
    }

    /// Count pages without producing a persisted artifact.
    ///
    /// Office documents still have to be converted to be counted; the
    /// converter's output is discarded.
    #[instrument(skip(self), fields(path = %path.display(), %kind))]
    pub async fn count_pages(&self, path: &Path, kind: FileKind) -> Result<PageCount> {
        let count = match kind {
            FileKind::Pdf => {
                let owned = path.to_path_buf();
                PageCount {
                    pages: blocking(move || count_pdf_pages(&owned)).await?,
                    is_estimate: false,
                }
            }
            FileKind::Image => PageCount { pages: 1, is_estimate: false },
            FileKind::Text => {
                let owned = path.to_path_buf();
                PageCount {
                    pages: blocking(move || estimate_text_pages(&owned)).await?,
                    is_estimate: true,
                }
            }
            FileKind::Office => {
                let prepared = self.prepare(path, kind).await?;
                PageCount { pages: prepared.pages, is_estimate: false }
            }
            FileKind::Other => PageCount { pages: 1, is_estimate: true },
        };
        debug!(pages = count.pages, "Pages counted");
        Ok(PageCount {
            pages: clamp_pages(count.pages),
            ..count
        })
    }

    async fn load_font(&self) -> Result<Vec<u8>> {
        let path = self.font_path.as_ref().ok_or_else(|| {
            PrintmeterError::ConversionFailed("no text font configured".into())
        })?;
        tokio::fs::read(path).await.map_err(|e| {
            PrintmeterError::ConversionFailed(format!(
                "cannot load text font {}: {e}",
                path.display()
            ))
        })
    }
}

/// Run CPU-bound work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PrintmeterError::ConversionFailed(format!("conversion task failed: {e}")))?
}

/// Read a text file as display lines (lossy UTF-8, CR stripped, tabs expanded).
fn read_text_lines(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    BufReader::new(file)
        .split(b'\n')
        .map(|chunk| {
            let chunk = chunk?;
            let line = String::from_utf8_lossy(&chunk);
            Ok(line.trim_end_matches('\r').replace('\t', "    "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::blank_pdf;
    use std::time::Duration;

    fn pipeline(font: Option<PathBuf>) -> ConversionPipeline {
        ConversionPipeline::new(
            OfficeConverter::new("/nonexistent/soffice", Duration::from_secs(1)),
            font,
        )
    }

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).expect("write");
        path
    }

    #[tokio::test]
    async fn pdf_is_counted_not_converted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "doc.pdf", &blank_pdf(4));
        let prepared = pipeline(None).prepare(&path, FileKind::Pdf).await.expect("prepare");
        assert_eq!(prepared.pages, 4);
        assert!(!prepared.is_estimate);
        assert!(prepared.pdf.is_none());
    }

    #[tokio::test]
    async fn empty_pdf_clamps_to_one_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "doc.pdf", &blank_pdf(0));
        let prepared = pipeline(None).prepare(&path, FileKind::Pdf).await.expect("prepare");
        assert_eq!(prepared.pages, 1);
    }

    #[tokio::test]
    async fn corrupt_pdf_fails_page_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "doc.pdf", b"%PDF-1.4 truncated");
        let err = pipeline(None).prepare(&path, FileKind::Pdf).await.unwrap_err();
        assert!(matches!(err, PrintmeterError::PageCountFailed(_)));
    }

    #[tokio::test]
    async fn image_becomes_single_page_pdf() {
        let dir = tempfile::tempdir().expect("tempdir");
        let img = image::RgbImage::from_pixel(8, 16, image::Rgb([0, 0, 0]));
        let path = dir.path().join("photo.png");
        img.save(&path).expect("save png");

        let prepared = pipeline(None).prepare(&path, FileKind::Image).await.expect("prepare");
        assert_eq!(prepared.pages, 1);
        let pdf = prepared.pdf.expect("converted pdf");
        assert_eq!(PdfReader::from_bytes(&pdf).expect("parse").page_count(), 1);
    }

    #[tokio::test]
    async fn text_without_font_fails_explicitly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "notes.txt", b"hello\n");
        let err = pipeline(None).prepare(&path, FileKind::Text).await.unwrap_err();
        assert!(matches!(err, PrintmeterError::ConversionFailed(_)));

        let missing = Some(dir.path().join("missing.ttf"));
        let err = pipeline(missing).prepare(&path, FileKind::Text).await.unwrap_err();
        assert!(matches!(err, PrintmeterError::ConversionFailed(_)));
    }

    #[tokio::test]
    async fn text_quote_is_estimate_without_font() {
        let dir = tempfile::tempdir().expect("tempdir");
        let body: String = (0..121).map(|i| format!("{i}\n")).collect();
        let path = write(dir.path(), "notes.txt", body.as_bytes());
        let count = pipeline(None).count_pages(&path, FileKind::Text).await.expect("count");
        assert_eq!(count, PageCount { pages: 3, is_estimate: true });
    }

    #[tokio::test]
    async fn other_is_one_estimated_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "blob.bin", &[0, 1, 2, 3]);
        let prepared = pipeline(None).prepare(&path, FileKind::Other).await.expect("prepare");
        assert_eq!(prepared.pages, 1);
        assert!(prepared.is_estimate);
        assert!(prepared.pdf.is_none());
    }

    #[tokio::test]
    async fn office_without_converter_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "minutes.docx", b"PK\x03\x04");
        let err = pipeline(None).prepare(&path, FileKind::Office).await.unwrap_err();
        assert!(matches!(err, PrintmeterError::ConversionFailed(_)));
    }

    #[test]
    fn text_lines_are_cleaned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "notes.txt", b"a\tb\r\nsecond");
        let lines = read_text_lines(&path).expect("read");
        assert_eq!(lines, vec!["a    b".to_string(), "second".to_string()]);
    }
}
