// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for printmeter.

use thiserror::Error;

/// Top-level error type for all printmeter operations.
#[derive(Debug, Error)]
pub enum PrintmeterError {
    // -- Request errors --
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // -- Document errors --
    #[error("file could not be classified: {0}")]
    ClassificationUnreadable(String),

    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    #[error("failed to read pages: {0}")]
    PageCountFailed(String),

    // -- Ledger errors --
    #[error("insufficient balance: {balance_cents} available, {cost_cents} required")]
    InsufficientBalance { balance_cents: i64, cost_cents: i64 },

    #[error("monthly limit exceeded: {spent_cents} spent + {cost_cents} > {limit_cents}")]
    MonthlyLimitExceeded {
        spent_cents: i64,
        cost_cents: i64,
        limit_cents: i64,
    },

    #[error("yearly limit exceeded: {spent_cents} spent + {cost_cents} > {limit_cents}")]
    YearlyLimitExceeded {
        spent_cents: i64,
        cost_cents: i64,
        limit_cents: i64,
    },

    #[error("user {0} not found")]
    UserNotFound(i64),

    #[error("print job {0} not found")]
    JobNotFound(i64),

    #[error("print job {job_id} is {status}, expected {expected}")]
    InvalidJobState {
        job_id: i64,
        status: String,
        expected: String,
    },

    // -- Dispatch errors --
    #[error("print error: {0}")]
    DispatchFailed(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    PersistenceFailed(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PrintmeterError {
    /// Whether this error is a ledger rejection (balance or cap violation).
    pub fn is_billing_rejection(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBalance { .. }
                | Self::MonthlyLimitExceeded { .. }
                | Self::YearlyLimitExceeded { .. }
        )
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintmeterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ledger_refusals_are_billing_rejections() {
        let capped = PrintmeterError::MonthlyLimitExceeded {
            spent_cents: 9000,
            cost_cents: 2000,
            limit_cents: 10000,
        };
        assert!(capped.is_billing_rejection());
        assert!(!PrintmeterError::DispatchFailed("busy".into()).is_billing_rejection());
        assert!(!PrintmeterError::InvalidRequest("missing printer".into()).is_billing_rejection());
    }
}
