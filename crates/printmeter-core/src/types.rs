// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the printmeter billing pipeline.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Fixed set of source kinds the conversion pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Image,
    Text,
    /// Word, PowerPoint, and Excel documents (converted externally).
    Office,
    /// Anything unrecognised — printed as-is.
    Other,
}

impl FileKind {
    /// Stable lowercase tag, as stored in job records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Image => "image",
            Self::Text => "text",
            Self::Office => "office",
            Self::Other => "other",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "pdf" => Some(Self::Pdf),
            "image" => Some(Self::Image),
            "text" => Some(Self::Text),
            "office" => Some(Self::Office),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle states of a print job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Money debited, waiting for the printer to accept the job.
    Queued,
    /// Dispatched successfully; dispatch identifier recorded.
    Printed,
    /// Dispatch failed and the debit was refunded.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Printed => "printed",
            Self::Failed => "failed",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "queued" => Some(Self::Queued),
            "printed" => Some(Self::Printed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a balance changed outside of a print debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopupReason {
    AutoDaily,
    AutoMonthly,
    AutoYearly,
    /// Reversal of a debit whose dispatch failed.
    Refund,
}

impl TopupReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoDaily => "auto_daily",
            Self::AutoMonthly => "auto_monthly",
            Self::AutoYearly => "auto_yearly",
            Self::Refund => "refund",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "auto_daily" => Some(Self::AutoDaily),
            "auto_monthly" => Some(Self::AutoMonthly),
            "auto_yearly" => Some(Self::AutoYearly),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

/// Actor recorded for automatic balance changes.
pub const SYSTEM_ACTOR: &str = "system";

/// Day, month, and year keys of an instant (`2026-03-09`, `2026-03`, `2026`).
///
/// Markers on user accounts are compared against these to detect a billing
/// period rollover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodKeys {
    pub day: String,
    pub month: String,
    pub year: String,
}

impl PeriodKeys {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            day: now.format("%Y-%m-%d").to_string(),
            month: now.format("%Y-%m").to_string(),
            year: now.format("%Y").to_string(),
        }
    }
}

/// Canonical timestamp encoding for stored records.
///
/// Second precision with a `Z` suffix, so lexicographic order matches
/// chronological order in SQL comparisons.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// The authenticated user behind a request, as supplied by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: i64,
    pub username: String,
}

/// A user's balance, caps, spend counters, and period markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    pub balance_cents: i64,
    pub daily_topup_cents: i64,
    pub monthly_topup_cents: i64,
    pub yearly_topup_cents: i64,
    /// 0 disables the monthly cap.
    pub monthly_limit_cents: i64,
    /// 0 disables the yearly cap.
    pub yearly_limit_cents: i64,
    pub month_spent_cents: i64,
    pub year_spent_cents: i64,
    pub last_daily_topup: String,
    pub last_monthly_topup: String,
    pub last_yearly_topup: String,
    /// Month key that `month_spent_cents` accumulates for.
    pub spent_month_key: String,
    /// Year key that `year_spent_cents` accumulates for.
    pub spent_year_key: String,
}

/// Values needed to create an account (admin collaborator / test fixtures).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub balance_cents: i64,
    pub daily_topup_cents: i64,
    pub monthly_topup_cents: i64,
    pub yearly_topup_cents: i64,
    pub monthly_limit_cents: i64,
    pub yearly_limit_cents: i64,
}

/// A billed print submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintRecord {
    pub id: i64,
    pub user_id: i64,
    pub printer_uri: String,
    pub filename: String,
    /// Upload path relative to the upload root (`YYYYMMDD/<name>`).
    pub stored_path: String,
    pub file_kind: FileKind,
    /// SHA-256 hex digest of the submitted bytes.
    pub document_hash: String,
    pub pages: i64,
    pub cost_cents: i64,
    pub balance_before_cents: i64,
    pub balance_after_cents: i64,
    pub month_total_cents: i64,
    pub year_total_cents: i64,
    pub status: JobStatus,
    pub dispatch_id: Option<String>,
    pub created_at: String,
}

/// Append-only audit entry for every non-print balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopupEntry {
    pub id: i64,
    pub user_id: i64,
    pub amount_cents: i64,
    pub balance_before_cents: i64,
    pub balance_after_cents: i64,
    pub reason: TopupReason,
    pub print_job_id: Option<i64>,
    pub actor: String,
    pub created_at: String,
}

/// A printer exposed by a dispatch backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterInfo {
    pub name: String,
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn period_keys_are_zero_padded() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 0).unwrap();
        let keys = PeriodKeys::at(at);
        assert_eq!(keys.day, "2026-03-09");
        assert_eq!(keys.month, "2026-03");
        assert_eq!(keys.year, "2026");
    }

    #[test]
    fn timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 11, 2, 3, 4, 5).unwrap();
        assert_eq!(format_timestamp(early), "2026-01-02T03:04:05Z");
        assert!(format_timestamp(early) < format_timestamp(late));
    }

    #[test]
    fn tags_round_trip() {
        for kind in [FileKind::Pdf, FileKind::Image, FileKind::Text, FileKind::Office, FileKind::Other] {
            assert_eq!(FileKind::from_tag(kind.as_str()), Some(kind));
        }
        for status in [JobStatus::Queued, JobStatus::Printed, JobStatus::Failed] {
            assert_eq!(JobStatus::from_tag(status.as_str()), Some(status));
        }
        assert_eq!(TopupReason::from_tag("refund"), Some(TopupReason::Refund));
        assert_eq!(TopupReason::from_tag("bonus"), None);
    }
}
