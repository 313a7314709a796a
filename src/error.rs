// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Keygate Contributors
//! Error types for the keygate library.
//!
//! Every fallible operation in the unlock pipeline reports one of the
//! error kinds below. During keyslot enumeration most of these are
//! swallowed by the driver, which keeps trying the remaining slots and
//! only surfaces [`KeygateError::AccessDenied`] once all of them are
//! exhausted.

use thiserror::Error;

/// Main error type for all unlock operations.
#[derive(Error, Debug)]
pub enum KeygateError {
    /// Header magic or version mismatch.
    #[error("Bad signature: {0}")]
    BadSignature(String),

    /// Metadata violation: missing or ill-typed field, unsupported type
    /// string, bad cipher string, failed base64 decode.
    #[error("Invalid argument: {0}")]
    BadArgument(String),

    /// A named hash is unavailable, or a digest/segment cross-reference
    /// does not resolve.
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O error while reading a header, the JSON area, or a keyslot area.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Digest mismatch, or every keyslot was exhausted.
    #[error("Access denied: {0}")]
    AccessDenied(String),
}

impl KeygateError {
    pub(crate) fn bad_argument(msg: impl Into<String>) -> Self {
        KeygateError::BadArgument(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        KeygateError::NotFound(msg.into())
    }
}

/// Type alias for Results using KeygateError.
pub type Result<T> = std::result::Result<T, KeygateError>;
