// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printmeter-document — Turning uploads into billable, print-ready documents.
//
// Provides file-kind classification (extension rules plus content sniffing),
// page counting and estimation, conversion of images, plain text, and office
// documents into PDF, and the on-disk layout of stored uploads.

pub mod classify;
pub mod convert;
pub mod estimate;
pub mod office;
pub mod pdf;
pub mod storage;

// Re-export the primary entry points so callers can use `printmeter_document::classify` etc.
pub use classify::{classify, sniff_content_type};
pub use convert::{ConversionPipeline, PreparedDocument};
pub use office::OfficeConverter;
pub use pdf::reader::PdfReader;
pub use pdf::writer::PdfWriter;
pub use storage::{StoredFile, UploadStore};
