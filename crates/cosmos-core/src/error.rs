// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application error types.
//!
//! Errors carry a kind from a closed set so the HTTP boundary can map them
//! to status codes. Any error without an application kind is treated as
//! `Internal` and its message is masked before it reaches a client.

use thiserror::Error;

/// Application error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A request or entity failed validation.
    Invalid,
    /// The requested entity does not exist.
    NotFound,
    /// The operation conflicts with current state (duplicates, runs in progress).
    Conflict,
    /// The operation is not supported.
    NotImplemented,
    /// Anything else. Details are never shown to clients.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Invalid => "invalid",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors produced by the domain and persistence layers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An application error with a kind and a client-safe message.
    #[error("cosmos error: kind={kind} message={message}")]
    App {
        /// The error kind.
        kind: ErrorKind,
        /// Client-safe message.
        message: String,
    },

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an `Invalid` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::App {
            kind: ErrorKind::Invalid,
            message: message.into(),
        }
    }

    /// Create a `NotFound` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Error::App {
            kind: ErrorKind::NotFound,
            message: message.into(),
        }
    }

    /// Create a `Conflict` error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Error::App {
            kind: ErrorKind::Conflict,
            message: message.into(),
        }
    }

    /// Create a `NotImplemented` error.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Error::App {
            kind: ErrorKind::NotImplemented,
            message: message.into(),
        }
    }

    /// The kind of this error. Errors without an application kind are `Internal`
    /// so implementation details never leak to the end user.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::App { kind, .. } => *kind,
            // Row-not-found from the driver is a lookup miss, not a fault.
            Error::Database(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }

    /// The client-facing message. `Internal` errors always render as a
    /// generic string; the original error is expected to be logged by the
    /// boundary that calls this.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal error".to_string(),
            _ => match self {
                Error::App { message, .. } => message.clone(),
                Error::Database(sqlx::Error::RowNotFound) => "Not found".to_string(),
                _ => "Internal error".to_string(),
            },
        }
    }
}

/// Result type using the application [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// True if the database error is a unique-constraint violation.
///
/// Unique violations on entity tables surface to callers as `Conflict`.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}
