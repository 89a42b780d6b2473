// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The replication pipeline.
//!
//! Four stages over bounded channels:
//!
//! ```text
//! Source Container ─S1─► ProcessSource ─S2─► Destination Container ─S3─► ProcessDest
//! ```
//!
//! ProcessSource forwards record and state messages and tallies records;
//! ProcessDest applies destination-acknowledged state messages to the run
//! snapshot. Everything else lands in the source/destination artifacts.
//! All stages share one cancellation token, and the bounded channels give
//! backpressure: a slow destination stalls the source read loop.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use cosmos_core::message::MessageType;
use cosmos_core::run::Run;

use crate::artifactory::{ArtifactRef, Artifactory, Slot};
use crate::error::{EngineError, Result};
use crate::runner::{CHANNEL_CAPACITY, ConnectorRunner, Item};

/// The in-flight run snapshot, shared across pipeline stages.
///
/// One mutex guards two disjoint fields written by different stages - the
/// record counter (source side) and the sync state (destination side) - and
/// makes the heartbeat's deep copy race-free.
pub struct RunWrapper {
    inner: Mutex<Run>,
}

impl RunWrapper {
    /// Wrap a run snapshot.
    pub fn new(run: Run) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(run),
        })
    }

    /// Deep copy of the current run, taken under the lock.
    pub fn snapshot(&self) -> Run {
        self.inner.lock().unwrap().clone()
    }

    /// Replace the wrapped run wholesale (heartbeat-details resume).
    pub fn replace(&self, run: Run) {
        *self.inner.lock().unwrap() = run;
    }

    /// Increment the record tally.
    pub fn add_record(&self) {
        self.inner.lock().unwrap().stats.num_records += 1;
    }

    /// Replace the sync state from a destination-acknowledged state message.
    pub fn set_state(&self, state: Value) {
        let mut run = self.inner.lock().unwrap();
        if let Some(sync) = run.sync.as_mut() {
            sync.state = Some(state);
        }
    }

    /// Mutate the run under the lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut Run) -> R) -> R {
        f(&mut self.inner.lock().unwrap())
    }
}

/// Run the four-stage replication pipeline to completion.
///
/// Waits for every stage to finalize; each stage error is appended to the
/// worker artifact and the first one becomes the returned error.
pub async fn run_replication(
    runner: &dyn ConnectorRunner,
    artifacts: &Arc<Artifactory>,
    run: &Arc<RunWrapper>,
    attempt: u32,
    cancel: CancellationToken,
    worker: &ArtifactRef,
) -> Result<()> {
    let snapshot = run.snapshot();
    let sync = snapshot
        .sync
        .as_ref()
        .ok_or(EngineError::MissingSnapshot(snapshot.id))?;
    let source_connector = sync
        .source_endpoint
        .as_ref()
        .and_then(|e| e.connector.clone())
        .ok_or(EngineError::MissingSnapshot(snapshot.id))?;
    let destination_connector = sync
        .destination_endpoint
        .as_ref()
        .and_then(|e| e.connector.clone())
        .ok_or(EngineError::MissingSnapshot(snapshot.id))?;

    let source_artifact = artifacts.get_ref(Slot::Source, attempt)?;
    let destination_artifact = artifacts.get_ref(Slot::Destination, attempt)?;

    let (s1, s1_done) = runner
        .read(
            &source_connector,
            artifacts,
            snapshot.options.wipe_destination,
            cancel.clone(),
        )
        .await;

    let (s2_tx, s2_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let s2_run = run.clone();
    let s2_cancel = cancel.clone();
    let s2_task = tokio::spawn(async move {
        process_source(s1, s2_tx, s2_run, source_artifact, s2_cancel).await
    });

    let (s3, s3_done) = runner
        .write(&destination_connector, artifacts, s2_rx, cancel.clone())
        .await;

    // The destination-side stage runs inline; when it returns, the stream
    // has drained and the remaining stages are finalizing.
    process_destination(s3, run.clone(), destination_artifact).await;

    cancel.cancel();

    let s1_result = completion_result(s1_done).await;
    let s2_result = s2_task.await.unwrap_or(Err(EngineError::StageAborted));
    let s3_result = completion_result(s3_done).await;

    let mut final_err = None;
    for result in [s1_result, s2_result, s3_result] {
        if let Err(e) = result {
            worker.println(&e);
            final_err = Some(e);
        }
    }

    match final_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn completion_result(done: oneshot::Receiver<crate::runner::Result<()>>) -> Result<()> {
    match done.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(EngineError::StageAborted),
    }
}

/// Source-side stage: forward record and state messages, tally records,
/// capture everything else to the source artifact.
async fn process_source(
    mut input: mpsc::Receiver<Item>,
    out: mpsc::Sender<cosmos_core::Message>,
    run: Arc<RunWrapper>,
    artifact: Arc<ArtifactRef>,
    cancel: CancellationToken,
) -> Result<()> {
    while let Some(item) = input.recv().await {
        match item {
            Item::Message(msg)
                if msg.is_type(MessageType::Record) || msg.is_type(MessageType::State) =>
            {
                let is_record = msg.is_type(MessageType::Record);
                let sent = tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = out.send(*msg) => sent,
                };
                if sent.is_err() {
                    break;
                }
                if is_record {
                    run.add_record();
                }
            }
            Item::Message(msg) => artifact.println(&msg),
            Item::Raw(line) => artifact.println(line),
        }
    }
    Ok(())
}

/// Destination-side stage: apply destination-acknowledged state to the run
/// snapshot, capture raw output to the destination artifact.
async fn process_destination(
    mut input: mpsc::Receiver<Item>,
    run: Arc<RunWrapper>,
    artifact: Arc<ArtifactRef>,
) {
    while let Some(item) = input.recv().await {
        match item {
            Item::Message(msg) if msg.is_type(MessageType::State) => {
                if let Some(state) = msg.state {
                    run.set_state(state.data);
                }
            }
            Item::Message(_) => {}
            Item::Raw(line) => artifact.println(line),
        }
    }
}
