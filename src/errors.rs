// Gonimbus object storage toolkit.
// Copyright 2025 Gonimbus developers.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Crate-wide error type and the closed error-code taxonomy used in
//! emitted records.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::{ErrorKind, ProviderError};

/// Classification codes for reportable failures.
///
/// This is a closed set: every error that reaches an `error` record or a
/// preflight result carries exactly one of these.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Object or bucket missing, or a stale listing (size mismatch).
    NotFound,
    /// Permissions or credential rejection.
    AccessDenied,
    /// Provider rate limiting or slow-down response.
    Throttled,
    /// Cancellation or deadline exceeded.
    Timeout,
    /// Transient service failure.
    ProviderUnavailable,
    /// Anything unclassified.
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::Throttled => "THROTTLED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Gonimbus error.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Invalid pattern {pattern:?}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Invalid filter: {reason}")]
    Filter { reason: String },

    #[error("Invalid path template: {reason}")]
    Template { reason: String },

    #[error("Invalid object URI {uri:?}: {reason}")]
    Uri { uri: String, reason: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The size advertised by the listing disagreed with the size returned
    /// when the object was opened: the listing is stale.
    #[error("Size mismatch for {key:?}: listed {listed} bytes, read {actual}")]
    SizeMismatch {
        key: String,
        listed: u64,
        actual: u64,
    },

    #[error("Provider {provider:?} does not support {capability}")]
    MissingCapability {
        capability: &'static str,
        provider: String,
    },

    #[error("Refusing {operation}: the read-only latch is set")]
    ReadOnly { operation: &'static str },

    #[error("Output writer is closed")]
    OutputClosed,

    #[error("Job cancelled")]
    Cancelled,

    #[error("Sharding requires a provider with delimiter listing")]
    ShardingUnsupported,

    #[error("IO error")]
    Io(#[from] io::Error),

    #[error("Serialization failed")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Map this error onto the closed code set used in records.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Provider(p) => p.kind().code(),
            Error::SizeMismatch { .. } => ErrorCode::NotFound,
            Error::Cancelled => ErrorCode::Timeout,
            _ => ErrorCode::Internal,
        }
    }
}

impl ErrorKind {
    /// The record-level code for a normalized provider fault.
    pub fn code(&self) -> ErrorCode {
        match self {
            ErrorKind::NotFound | ErrorKind::BucketNotFound => ErrorCode::NotFound,
            ErrorKind::AccessDenied | ErrorKind::InvalidCredentials => ErrorCode::AccessDenied,
            ErrorKind::Throttled => ErrorCode::Throttled,
            ErrorKind::Unavailable => ErrorCode::ProviderUnavailable,
            ErrorKind::Other => ErrorCode::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::AccessDenied).unwrap(),
            "\"ACCESS_DENIED\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::ProviderUnavailable).unwrap(),
            "\"PROVIDER_UNAVAILABLE\""
        );
    }

    #[test]
    fn display_matches_wire_form() {
        for code in [
            ErrorCode::NotFound,
            ErrorCode::AccessDenied,
            ErrorCode::Throttled,
            ErrorCode::Timeout,
            ErrorCode::ProviderUnavailable,
            ErrorCode::Internal,
        ] {
            let wire = serde_json::to_string(&code).unwrap();
            assert_eq!(wire, format!("\"{code}\""));
        }
    }

    #[test]
    fn cancellation_classifies_as_timeout() {
        assert_eq!(Error::Cancelled.code(), ErrorCode::Timeout);
    }
}
