// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock connector runner for testing.
//!
//! Streaming operations are scripted: each invocation pops the next
//! [`ScriptedOutput`] and replays its items before resolving its result.
//! The write side mirrors the real forwarding contract - record messages
//! are consumed (and counted), everything else reappears on the output.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use cosmos_core::connector::Connector;
use cosmos_core::message::{Catalog, Message, MessageType};

use super::{
    CHANNEL_CAPACITY, ConnectorRunner, Item, OutStream, Result, RunnerError,
};
use crate::artifactory::Artifactory;

/// One scripted streaming invocation.
pub struct ScriptedOutput {
    /// Items emitted on the output channel, in order.
    pub items: Vec<Item>,
    /// Terminal result delivered after the items.
    pub result: Result<()>,
    /// Time the connector stays alive after its last item. Cancellation
    /// during the linger resolves the invocation as cancelled.
    pub linger: std::time::Duration,
}

impl ScriptedOutput {
    /// A successful invocation emitting the given items.
    pub fn ok(items: Vec<Item>) -> Self {
        Self {
            items,
            result: Ok(()),
            linger: std::time::Duration::ZERO,
        }
    }

    /// A failed invocation emitting the given items before exiting.
    pub fn exit(items: Vec<Item>, code: i32) -> Self {
        Self {
            items,
            result: Err(RunnerError::Exit { code }),
            linger: std::time::Duration::ZERO,
        }
    }

    /// Keep the connector alive for `linger` after its last item.
    pub fn with_linger(mut self, linger: std::time::Duration) -> Self {
        self.linger = linger;
        self
    }
}

/// Scripted [`ConnectorRunner`] for tests.
#[derive(Default)]
pub struct MockRunner {
    reads: Mutex<VecDeque<ScriptedOutput>>,
    writes: Mutex<VecDeque<ScriptedOutput>>,
    normalizations: Mutex<VecDeque<ScriptedOutput>>,
    records_written: Arc<AtomicU64>,
    normalize_calls: AtomicU64,
}

impl MockRunner {
    /// Create a runner with no scripts; streaming operations succeed empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a script for the next `read` invocation.
    pub fn script_read(&self, script: ScriptedOutput) {
        self.reads.lock().unwrap().push_back(script);
    }

    /// Queue a script for the next `write` invocation; its items are
    /// emitted after the forwarded input drains.
    pub fn script_write(&self, script: ScriptedOutput) {
        self.writes.lock().unwrap().push_back(script);
    }

    /// Queue a script for the next `normalize` invocation.
    pub fn script_normalize(&self, script: ScriptedOutput) {
        self.normalizations.lock().unwrap().push_back(script);
    }

    /// Records forwarded to destinations so far.
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::SeqCst)
    }

    /// Number of `normalize` invocations that actually ran.
    pub fn normalize_calls(&self) -> u64 {
        self.normalize_calls.load(Ordering::SeqCst)
    }

    /// A record message for scripting sources.
    pub fn record(stream: &str, data: Value) -> Item {
        Item::Message(Box::new(Message {
            message_type: Some(MessageType::Record),
            record: Some(cosmos_core::message::Record {
                stream: stream.to_string(),
                data,
                emitted_at: 0,
                namespace: None,
            }),
            ..Default::default()
        }))
    }

    /// A state message for scripting sources.
    pub fn state(data: Value) -> Item {
        Item::Message(Box::new(Message {
            message_type: Some(MessageType::State),
            state: Some(cosmos_core::message::State { data }),
            ..Default::default()
        }))
    }

    fn play(script: ScriptedOutput, cancel: CancellationToken) -> OutStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            for item in script.items {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = done_tx.send(Err(RunnerError::Cancelled));
                        return;
                    }
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            if !script.linger.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        drop(tx);
                        let _ = done_tx.send(Err(RunnerError::Cancelled));
                        return;
                    }
                    _ = tokio::time::sleep(script.linger) => {}
                }
            }
            drop(tx);
            let _ = done_tx.send(script.result);
        });
        (rx, done_rx)
    }
}

#[async_trait]
impl ConnectorRunner for MockRunner {
    async fn spec(&self, _connector: &Connector) -> Result<Message> {
        Ok(Message {
            message_type: Some(MessageType::Spec),
            spec: Some(Default::default()),
            ..Default::default()
        })
    }

    async fn check(&self, _connector: &Connector, _config: &Value) -> Result<Message> {
        Ok(Message {
            message_type: Some(MessageType::ConnectionStatus),
            connection_status: Some(cosmos_core::message::ConnectionStatus {
                status: cosmos_core::message::CONNECTION_STATUS_SUCCEEDED.to_string(),
                message: None,
            }),
            ..Default::default()
        })
    }

    async fn discover(&self, _connector: &Connector, _config: &Value) -> Result<Message> {
        Ok(Message {
            message_type: Some(MessageType::Catalog),
            catalog: Some(Catalog::default()),
            ..Default::default()
        })
    }

    async fn read(
        &self,
        _connector: &Connector,
        _artifacts: &Artifactory,
        empty: bool,
        cancel: CancellationToken,
    ) -> OutStream {
        if empty {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            let (done_tx, done_rx) = oneshot::channel();
            drop(tx);
            let _ = done_tx.send(Ok(()));
            return (rx, done_rx);
        }
        let script = self
            .reads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedOutput::ok(Vec::new()));
        Self::play(script, cancel)
    }

    async fn write(
        &self,
        _connector: &Connector,
        _artifacts: &Artifactory,
        mut input: mpsc::Receiver<Message>,
        cancel: CancellationToken,
    ) -> OutStream {
        let script = self
            .writes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedOutput::ok(Vec::new()));

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();
        let records_written = self.records_written.clone();

        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = input.recv() => msg,
                };
                let Some(msg) = msg else { break };

                if msg.is_type(MessageType::Record) {
                    records_written.fetch_add(1, Ordering::SeqCst);
                } else {
                    // Non-record input passes through, like the real forwarder.
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tx.send(Item::Message(Box::new(msg))) => {}
                    }
                }
            }

            for item in script.items {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            drop(tx);
            let _ = done_tx.send(script.result);
        });

        (rx, done_rx)
    }

    async fn normalize(
        &self,
        connector: &Connector,
        _artifacts: &Artifactory,
        enabled: bool,
        cancel: CancellationToken,
    ) -> OutStream {
        if !enabled || connector.destination_type.is_empty() {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            let (done_tx, done_rx) = oneshot::channel();
            let _ = tx
                .try_send(Item::Raw(
                    "Normalization is not available or is disabled. Skipping.".to_string(),
                ));
            drop(tx);
            let _ = done_tx.send(Ok(()));
            return (rx, done_rx);
        }
        self.normalize_calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .normalizations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedOutput::ok(Vec::new()));
        Self::play(script, cancel)
    }
}
