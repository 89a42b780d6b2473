// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connector runners - protocol operation execution backends.
//!
//! A runner translates the six protocol operations (`spec`, `check`,
//! `discover`, `read`, `write`, `normalize`) into connector invocations.
//! The streaming operations hand back a bounded channel of [`Item`]s plus a
//! one-shot completion carrying the process result; line-level parse
//! failures are never errors, they surface as opaque [`Item::Raw`] strings.

pub mod docker;
pub mod mock;

pub use docker::DockerRunner;
pub use mock::{MockRunner, ScriptedOutput};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use cosmos_core::connector::Connector;
use cosmos_core::message::{Message, MessageType};

use crate::artifactory::Artifactory;

/// Capacity of every streaming channel; provides backpressure so a slow
/// destination stalls the source read loop without unbounded buffering.
pub const CHANNEL_CAPACITY: usize = 100;

/// One unit of scanner output: a protocol message, or an opaque line.
#[derive(Debug, Clone)]
pub enum Item {
    /// A line that parsed and validated as a protocol message.
    Message(Box<Message>),
    /// Anything else the connector printed.
    Raw(String),
}

impl Item {
    /// The message, when this item is one of the given type.
    pub fn message_of(&self, t: MessageType) -> Option<&Message> {
        match self {
            Item::Message(msg) if msg.is_type(t) => Some(msg),
            _ => None,
        }
    }
}

/// Errors from runner operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// Spawning or talking to the connector process failed.
    #[error("connector IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The connector process exited with a non-zero code.
    #[error("connector exited with code {code}")]
    Exit {
        /// Exit code, or -1 when terminated by a signal.
        code: i32,
    },

    /// An interactive operation produced no message of the expected type.
    #[error("connector produced no {0} message")]
    MissingMessage(MessageType),

    /// Execution was cancelled.
    #[error("execution cancelled")]
    Cancelled,

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Domain error (artifact lookup, protocol validation).
    #[error(transparent)]
    Core(#[from] cosmos_core::Error),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Receiver resolving to the single terminal result of a streaming
/// operation, delivered after the item channel has closed.
pub type Completion = oneshot::Receiver<Result<()>>;

/// A stream of items plus its completion.
pub type OutStream = (mpsc::Receiver<Item>, Completion);

/// Protocol operation execution backend.
///
/// Runners are pure execution engines: they read artifact files the caller
/// prepared and never touch the database.
#[async_trait]
pub trait ConnectorRunner: Send + Sync {
    /// Fetch the connector's configuration spec.
    async fn spec(&self, connector: &Connector) -> Result<Message>;

    /// Check a configuration against the live system.
    async fn check(&self, connector: &Connector, config: &Value) -> Result<Message>;

    /// Discover the connector's catalog. Destinations do not discover; for
    /// them this succeeds with an empty catalog.
    async fn discover(&self, connector: &Connector, config: &Value) -> Result<Message>;

    /// Stream records and state from a source.
    ///
    /// When `empty` is true the item channel closes immediately and the
    /// completion signals success without spawning anything: wipe runs send
    /// nothing from the source.
    async fn read(
        &self,
        connector: &Connector,
        artifacts: &Artifactory,
        empty: bool,
        cancel: CancellationToken,
    ) -> OutStream;

    /// Stream messages into a destination.
    ///
    /// Record messages are forwarded to the connector's stdin; everything
    /// else (principally state) bypasses the connector and reappears on the
    /// output unchanged. A broken pipe stops the forwarder without failing
    /// the operation.
    async fn write(
        &self,
        connector: &Connector,
        artifacts: &Artifactory,
        input: mpsc::Receiver<Message>,
        cancel: CancellationToken,
    ) -> OutStream;

    /// Run the bundled normalization image against the destination.
    ///
    /// Disabled normalization, or a connector without a destination type,
    /// short-circuits with one informational item and success.
    async fn normalize(
        &self,
        connector: &Connector,
        artifacts: &Artifactory,
        enabled: bool,
        cancel: CancellationToken,
    ) -> OutStream;
}
