// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job orchestration: one submission from upload to printer.
//
//   received ─► priced ─► queued ─► printed
//       │          │         │
//       └► rejected ◄┘       └► failed-refunded
//
// Nothing before `queued` touches the ledger. Once money has moved, a failed
// dispatch is always refunded before the error is returned.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, instrument, warn};

use printmeter_core::error::{PrintmeterError, Result};
use printmeter_core::types::{FileKind, Requester};
use printmeter_document::classify::SNIFF_LEN;
use printmeter_document::storage::{StoredFile, sanitize_filename};
use printmeter_document::{ConversionPipeline, UploadStore, classify, sniff_content_type};
use printmeter_ledger::{DebitOutcome, DebitRequest, Ledger};
use printmeter_print::{DispatchRequest, PrintDispatcher};

/// MIME type of converted artifacts.
const PDF_MIME: &str = "application/pdf";

/// One inbound print request, as handed over by the HTTP boundary.
#[derive(Debug, Clone)]
pub struct Submission {
    pub requester: Requester,
    /// Printer URI or installed printer name.
    pub printer: String,
    /// Client-side filename.
    pub filename: String,
    /// Content type declared by the client, if any.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Successful submission result, serialised for the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    /// Identifier assigned by the printer or spooler.
    pub job_id: String,
    /// Ledger record of the job.
    pub record_id: i64,
    pub ok: bool,
    pub pages: i64,
    pub cost_cents: i64,
    pub balance_cents: i64,
    pub month_spent_cents: i64,
    pub year_spent_cents: i64,
}

/// Price estimate for a document that is not printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub file_kind: FileKind,
    pub pages: i64,
    pub is_estimate: bool,
    pub cost_cents: i64,
}

/// A document that has been classified, converted, and counted.
struct Priced {
    kind: FileKind,
    pages: i64,
    /// Converted artifact, when the kind needs one.
    pdf: Option<Vec<u8>>,
}

/// Removes a stored upload and its artifact on drop unless released.
///
/// Covers every early return and cancellation between storing the upload
/// and creating its job record.
struct UploadGuard<'a> {
    uploads: &'a UploadStore,
    rel_path: Option<String>,
}

impl<'a> UploadGuard<'a> {
    fn new(uploads: &'a UploadStore, rel_path: String) -> Self {
        Self {
            uploads,
            rel_path: Some(rel_path),
        }
    }

    /// The job record owns the files from here on.
    fn release(&mut self) {
        self.rel_path = None;
    }

    /// Remove the files now, off the async workers.
    async fn discard(mut self) {
        if let Some(rel) = self.rel_path.take() {
            let removed = remove_files(self.uploads.clone(), rel.clone()).await;
            info!(rel_path = %rel, removed, "rejected upload discarded");
        }
    }
}

impl Drop for UploadGuard<'_> {
    // Still armed here only if the submission future was cancelled.
    fn drop(&mut self) {
        let Some(rel) = self.rel_path.take() else {
            return;
        };
        let uploads = self.uploads.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    let removed = uploads.remove_with_artifacts(&rel);
                    info!(rel_path = %rel, removed, "abandoned upload discarded");
                });
            }
            Err(_) => {
                let removed = uploads.remove_with_artifacts(&rel);
                info!(rel_path = %rel, removed, "abandoned upload discarded");
            }
        }
    }
}

/// Run blocking work (filesystem, SQLite) off the async workers.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PrintmeterError::Io(std::io::Error::other(format!("worker task: {e}"))))?
}

/// Remove an upload and its artifact on the blocking pool; 0 if the task died.
async fn remove_files(uploads: UploadStore, rel_path: String) -> usize {
    blocking(move || Ok(uploads.remove_with_artifacts(&rel_path)))
        .await
        .unwrap_or(0)
}

/// SHA-256 of the submitted bytes, lower-case hex.
pub fn document_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Drives submissions through conversion, billing, and dispatch.
///
/// Shared across concurrent requests; per-user consistency comes from the
/// ledger's transactions, not from locking here.
pub struct JobOrchestrator<D> {
    ledger: Ledger,
    uploads: UploadStore,
    pipeline: ConversionPipeline,
    dispatcher: D,
    /// Bounds classification plus conversion, never dispatch.
    conversion_timeout: Duration,
}

impl<D: PrintDispatcher> JobOrchestrator<D> {
    pub fn new(
        ledger: Ledger,
        uploads: UploadStore,
        pipeline: ConversionPipeline,
        dispatcher: D,
        conversion_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            uploads,
            pipeline,
            dispatcher,
            conversion_timeout,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Store, convert, bill, and print one document.
    #[instrument(
        skip(self, submission),
        fields(
            user_id = submission.requester.user_id,
            printer = %submission.printer,
            filename = %submission.filename,
            bytes = submission.bytes.len()
        )
    )]
    pub async fn submit(&self, submission: Submission) -> Result<SubmissionReceipt> {
        let Submission {
            requester,
            printer,
            filename,
            content_type,
            bytes,
        } = submission;

        // -- received --------------------------------------------------------
        if printer.trim().is_empty() {
            return Err(PrintmeterError::InvalidRequest("missing printer".into()));
        }

        let now = Utc::now();
        let hash = document_hash(&bytes);
        let uploads = self.uploads.clone();
        let name = filename.clone();
        let (stored, bytes) =
            blocking(move || uploads.save(&name, &bytes, now).map(|stored| (stored, bytes))).await?;
        let mut guard = UploadGuard::new(&self.uploads, stored.rel_path.clone());

        // -- priced, then queued ---------------------------------------------
        let billed = self
            .price_and_debit(&requester, &printer, &filename, &stored, hash, now)
            .await;
        let (priced, outcome) = match billed {
            Ok(billed) => billed,
            Err(err) => {
                guard.discard().await;
                return Err(err);
            }
        };
        guard.release();

        // -- dispatch --------------------------------------------------------
        let (document, mime_type) = match priced.pdf {
            Some(pdf) => (pdf, PDF_MIME.to_string()),
            None => {
                let mime = content_type
                    .filter(|ct| !ct.trim().is_empty())
                    .unwrap_or_else(|| {
                        sniff_content_type(&bytes[..bytes.len().min(SNIFF_LEN)]).to_string()
                    });
                (bytes, mime)
            }
        };

        let request = DispatchRequest {
            printer,
            document,
            mime_type,
            user_name: Some(requester.username.clone()),
            job_name: Some(filename),
        };
        let dispatch_id = match self.dispatcher.send(request).await {
            Ok(id) => id,
            Err(err) => {
                error!(job_id = outcome.job_id, error = %err, "dispatch failed, refunding");
                self.refund_failed_dispatch(&requester, &outcome).await;
                let removed = remove_files(self.uploads.clone(), stored.rel_path.clone()).await;
                info!(job_id = outcome.job_id, removed, "failed job files removed");
                return Err(err);
            }
        };

        // -- printed ---------------------------------------------------------
        let ledger = self.ledger.clone();
        let (job_id, commit_id) = (outcome.job_id, dispatch_id.clone());
        if let Err(err) = blocking(move || ledger.commit(job_id, &commit_id)).await {
            // The printer has the job; the record stays `queued` with the charge.
            warn!(job_id, error = %err, "could not mark job printed");
        }

        info!(
            job_id = outcome.job_id,
            %dispatch_id,
            pages = priced.pages,
            cost_cents = outcome.cost_cents,
            "print job submitted"
        );
        Ok(SubmissionReceipt {
            job_id: dispatch_id,
            record_id: outcome.job_id,
            ok: true,
            pages: priced.pages,
            cost_cents: outcome.cost_cents,
            balance_cents: outcome.balance_cents,
            month_spent_cents: outcome.month_spent_cents,
            year_spent_cents: outcome.year_spent_cents,
        })
    }

    /// Count the pages of a document and price them, without storing or
    /// billing anything.
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn quote(&self, filename: &str, bytes: &[u8]) -> Result<Quote> {
        let scratch = tempfile::Builder::new().prefix("printmeter-quote-").tempdir()?;
        let path = scratch.path().join(sanitize_filename(filename));
        tokio::fs::write(&path, bytes).await?;

        let counted = tokio::time::timeout(self.conversion_timeout, async {
            let kind = classify_blocking(&path, filename).await?;
            let count = self.pipeline.count_pages(&path, kind).await?;
            Ok::<_, PrintmeterError>((kind, count))
        })
        .await
        .map_err(|_| {
            PrintmeterError::ConversionFailed(format!(
                "timed out after {}s",
                self.conversion_timeout.as_secs()
            ))
        })??;
        let (file_kind, count) = counted;

        let ledger = self.ledger.clone();
        let per_page = blocking(move || ledger.per_page_cents()).await?;
        let cost_cents = count
            .pages
            .checked_mul(per_page)
            .ok_or_else(|| {
                PrintmeterError::InvalidRequest(format!("cost overflow for {} pages", count.pages))
            })?;
        Ok(Quote {
            file_kind,
            pages: count.pages,
            is_estimate: count.is_estimate,
            cost_cents,
        })
    }

    /// Price the stored upload under the conversion timeout, then debit it.
    async fn price_and_debit(
        &self,
        requester: &Requester,
        printer: &str,
        filename: &str,
        stored: &StoredFile,
        hash: String,
        now: DateTime<Utc>,
    ) -> Result<(Priced, DebitOutcome)> {
        let priced = match tokio::time::timeout(
            self.conversion_timeout,
            self.price(&stored.abs_path, &stored.rel_path, filename),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout_secs = self.conversion_timeout.as_secs(), "conversion timed out");
                return Err(PrintmeterError::ConversionFailed(format!(
                    "timed out after {}s",
                    self.conversion_timeout.as_secs()
                )));
            }
        };

        let debit = DebitRequest {
            user_id: requester.user_id,
            printer_uri: printer.to_string(),
            filename: filename.to_string(),
            stored_path: stored.rel_path.clone(),
            file_kind: priced.kind,
            document_hash: hash,
            pages: priced.pages,
            now,
        };
        let ledger = self.ledger.clone();
        match blocking(move || ledger.debit(&debit)).await {
            Ok(outcome) => Ok((priced, outcome)),
            Err(err) => {
                if err.is_billing_rejection() {
                    info!(error = %err, "submission rejected by ledger");
                }
                Err(err)
            }
        }
    }

    /// Classify, convert, and count a stored upload; persist its artifact.
    async fn price(&self, abs_path: &Path, rel_path: &str, filename: &str) -> Result<Priced> {
        let kind = classify_blocking(abs_path, filename).await?;
        let prepared = self.pipeline.prepare(abs_path, kind).await?;

        let pdf = match prepared.pdf {
            Some(pdf) => {
                let uploads = self.uploads.clone();
                let rel = rel_path.to_string();
                Some(blocking(move || uploads.save_converted(&rel, &pdf).map(|_| pdf)).await?)
            }
            None => None,
        };
        Ok(Priced {
            kind,
            pages: prepared.pages,
            pdf,
        })
    }

    async fn refund_failed_dispatch(&self, requester: &Requester, outcome: &DebitOutcome) {
        let ledger = self.ledger.clone();
        let (job_id, user_id, cost) = (outcome.job_id, requester.user_id, outcome.cost_cents);
        match blocking(move || ledger.refund(job_id, user_id, cost, Utc::now())).await {
            Ok(balance) => info!(job_id, balance_cents = balance, "dispatch failure refunded"),
            Err(err) => error!(job_id, user_id, cost_cents = cost, error = %err, "refund failed"),
        }
    }
}

async fn classify_blocking(path: &Path, filename: &str) -> Result<FileKind> {
    let (path, name): (PathBuf, String) = (path.to_path_buf(), filename.to_string());
    blocking(move || Ok(classify(&path, &name))).await
}
