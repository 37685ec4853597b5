// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the HTTP boundary.
//
// Every error is mapped to a short message the user can act on and the HTTP
// status the boundary should answer with.

use crate::error::PrintmeterError;

/// HTTP status for bad input and billing rejections.
pub const STATUS_BAD_REQUEST: u16 = 400;

/// HTTP status for everything the user cannot fix.
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// A user-facing rendering of a `PrintmeterError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanError {
    /// Short message shown to the user.
    pub message: String,
    /// HTTP status code for the JSON error response.
    pub status: u16,
    /// Whether submitting the same document again may succeed.
    pub retriable: bool,
}

impl HumanError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: STATUS_BAD_REQUEST,
            retriable: false,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: STATUS_INTERNAL_ERROR,
            retriable: true,
        }
    }
}

/// Convert a `PrintmeterError` into the message and status the boundary reports.
pub fn humanize_error(err: &PrintmeterError) -> HumanError {
    match err {
        PrintmeterError::InvalidRequest(detail) => HumanError::bad_request(detail.clone()),

        PrintmeterError::ClassificationUnreadable(_) | PrintmeterError::ConversionFailed(_) => {
            HumanError::bad_request("conversion failed")
        }

        PrintmeterError::PageCountFailed(_) => HumanError::bad_request("failed to read pages"),

        PrintmeterError::InsufficientBalance { .. } => {
            HumanError::bad_request("insufficient balance for this print job")
        }

        PrintmeterError::MonthlyLimitExceeded { .. } => {
            HumanError::bad_request("monthly spending limit exceeded")
        }

        PrintmeterError::YearlyLimitExceeded { .. } => {
            HumanError::bad_request("yearly spending limit exceeded")
        }

        PrintmeterError::UserNotFound(_) => HumanError {
            message: "account not found".into(),
            status: STATUS_BAD_REQUEST,
            retriable: false,
        },

        PrintmeterError::DispatchFailed(detail) => {
            HumanError::internal(format!("print error: {detail}"))
        }

        PrintmeterError::JobNotFound(_)
        | PrintmeterError::InvalidJobState { .. }
        | PrintmeterError::PersistenceFailed(_) => {
            HumanError::internal("failed to create print record")
        }

        PrintmeterError::Io(_) => HumanError::internal("failed to save file"),

        PrintmeterError::Serialization(_) => HumanError::internal("internal data error"),
    }
}

/// HTTP status code for an error (convenience over [`humanize_error`]).
pub fn http_status(err: &PrintmeterError) -> u16 {
    humanize_error(err).status
}
