// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the run engine.

use thiserror::Error;

use crate::runner::RunnerError;

/// Errors produced by workflow activities and the pipeline.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Domain or persistence error.
    #[error(transparent)]
    Core(#[from] cosmos_core::Error),

    /// Connector execution error.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A run reached the engine without its sync snapshot attached.
    #[error("run {0} has no sync snapshot")]
    MissingSnapshot(i64),

    /// An activity attempt produced no heartbeat within the timeout.
    #[error("activity heartbeat timed out")]
    HeartbeatTimeout,

    /// An activity attempt exceeded its start-to-close timeout.
    #[error("activity start-to-close timeout elapsed")]
    StartToCloseTimeout,

    /// A pipeline stage terminated without reporting a result.
    #[error("pipeline stage terminated abnormally")]
    StageAborted,

    /// The workflow was cancelled.
    #[error("workflow cancelled")]
    Cancelled,
}

/// Result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;
