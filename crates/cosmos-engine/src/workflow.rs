// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The ingestion workflow.
//!
//! Five activities run in order, each retryable and heartbeating:
//!
//! | Activity | Responsibility |
//! |----------|----------------|
//! | `GetRun` | Mark the run running, snapshot the sync graph |
//! | `Initialize` | Open the artifactory, persist configs/catalog/state |
//! | `Replication` | The four-stage streaming pipeline |
//! | `Normalization` | Optional post-write SQL transformation |
//! | `DBUpdate` | Commit state and terminal status |
//!
//! The snapshot taken at `GetRun` is carried through the whole workflow, so
//! edits to the sync table never perturb in-flight work. `DBUpdate` runs on
//! a disconnected cancellation context: even a cancelled workflow commits
//! its final state, and it commits `sync.state` before the terminal status
//! so the scheduler can never start a successor with stale state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use cosmos_core::config::{ARTIFACT_ROOT, TASK_QUEUE};
use cosmos_core::message::{DESTINATION_SYNC_MODE_OVERWRITE, SYNC_MODE_FULL_REFRESH};
use cosmos_core::run::{Run, RunStatus, RunUpdate};
use cosmos_core::store::Store;
use cosmos_core::sync::SyncUpdate;

use crate::artifactory::{Artifactory, Slot};
use crate::durable::{ActivityContext, ActivityOptions, HeartbeatRecorder, execute_activity};
use crate::error::{EngineError, Result};
use crate::pipeline::{self, RunWrapper};
use crate::runner::{ConnectorRunner, Item};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for per-run artifacts.
    pub artifact_root: PathBuf,
    /// Heartbeat period inside activities.
    pub heartbeat_period: Duration,
    /// Options shared by all activities.
    pub activity: ActivityOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from(ARTIFACT_ROOT),
            heartbeat_period: Duration::from_secs(5),
            activity: ActivityOptions::default(),
        }
    }
}

struct WorkflowEntry {
    workflow_run_id: String,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Handle identifying one workflow execution.
#[derive(Debug, Clone)]
pub struct WorkflowHandle {
    /// Deduplication key; the sync ID as a string.
    pub workflow_id: String,
    /// Unique ID of this particular execution.
    pub workflow_run_id: String,
}

/// Drives ingestion workflows and owns the per-workflow-ID dedup table.
pub struct IngestionEngine {
    store: Arc<dyn Store>,
    runner: Arc<dyn ConnectorRunner>,
    config: EngineConfig,
    workflows: Mutex<HashMap<String, WorkflowEntry>>,
}

impl IngestionEngine {
    /// Create an engine over the given store and runner.
    pub fn new(
        store: Arc<dyn Store>,
        runner: Arc<dyn ConnectorRunner>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            runner,
            config,
            workflows: Mutex::new(HashMap::new()),
        })
    }

    /// Start the ingestion workflow for a run.
    ///
    /// At most one workflow per ID executes at a time: when one is already
    /// in flight, its existing handle is returned and nothing new starts.
    pub fn start_ingestion(self: &Arc<Self>, workflow_id: String, run_id: i64) -> WorkflowHandle {
        let mut workflows = self.workflows.lock().unwrap();

        if let Some(entry) = workflows.get(&workflow_id)
            && !entry.join.is_finished()
        {
            return WorkflowHandle {
                workflow_id,
                workflow_run_id: entry.workflow_run_id.clone(),
            };
        }

        let cancel = CancellationToken::new();
        let workflow_run_id = Uuid::new_v4().to_string();
        info!(
            workflow_id = %workflow_id,
            workflow_run_id = %workflow_run_id,
            run_id,
            task_queue = TASK_QUEUE,
            "starting ingestion workflow"
        );

        let engine = self.clone();
        let workflow_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            if let Err(e) = engine.ingestion_workflow(run_id, workflow_cancel).await {
                warn!(run_id, error = %e, "ingestion workflow finished with error");
            }
        });

        workflows.insert(
            workflow_id.clone(),
            WorkflowEntry {
                workflow_run_id: workflow_run_id.clone(),
                cancel,
                join,
            },
        );

        WorkflowHandle {
            workflow_id,
            workflow_run_id,
        }
    }

    /// Cancel the workflow execution identified by `(workflow_id, workflow_run_id)`.
    pub fn cancel_workflow(
        &self,
        workflow_id: &str,
        workflow_run_id: &str,
    ) -> cosmos_core::Result<()> {
        let workflows = self.workflows.lock().unwrap();
        match workflows.get(workflow_id) {
            Some(entry) if entry.workflow_run_id == workflow_run_id => {
                entry.cancel.cancel();
                Ok(())
            }
            _ => Err(cosmos_core::Error::not_found(
                "No workflow execution for this run",
            )),
        }
    }

    /// Wait for the workflow with the given ID to finish. Test support.
    pub async fn wait_for(&self, workflow_id: &str) {
        let join = {
            let mut workflows = self.workflows.lock().unwrap();
            workflows.remove(workflow_id).map(|entry| entry.join)
        };
        if let Some(join) = join {
            let _ = join.await;
        }
    }

    async fn ingestion_workflow(
        self: Arc<Self>,
        run_id: i64,
        cancel: CancellationToken,
    ) -> Result<()> {
        let opts = self.config.activity.clone();

        let run = execute_activity("GetRun", &opts, &cancel, |actx| {
            let engine = self.clone();
            async move { engine.get_run(actx, run_id).await }
        })
        .await?;

        let wrapper = RunWrapper::new(run);

        let staged = async {
            execute_activity("Initialize", &opts, &cancel, |actx| {
                let engine = self.clone();
                let wrapper = wrapper.clone();
                async move { engine.initialize(actx, wrapper).await }
            })
            .await?;

            execute_activity("Replication", &opts, &cancel, |actx| {
                let engine = self.clone();
                let wrapper = wrapper.clone();
                async move { engine.replication(actx, wrapper).await }
            })
            .await?;

            // Skipped outright when the workflow was cancelled during
            // replication; the runner short-circuits disabled normalization.
            execute_activity("Normalization", &opts, &cancel, |actx| {
                let engine = self.clone();
                let wrapper = wrapper.clone();
                async move { engine.normalization(actx, wrapper).await }
            })
            .await?;

            Ok(())
        }
        .await;

        self.update_db(&wrapper, staged.err(), &cancel).await
    }

    /// Resolve the final status and commit it via the DBUpdate activity on a
    /// disconnected cancellation context.
    async fn update_db(
        &self,
        wrapper: &Arc<RunWrapper>,
        err: Option<EngineError>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let status = resolve_status(
            wrapper.snapshot().options.wipe_destination,
            err.as_ref(),
            cancel.is_cancelled(),
        );
        wrapper.update(|run| {
            run.status = status;
            run.stats.execution_end = Some(Utc::now());
        });

        let disconnected = CancellationToken::new();
        let result = execute_activity("DBUpdate", &self.config.activity, &disconnected, |actx| {
            let wrapper = wrapper.clone();
            async move { self.db_update(actx, wrapper).await }
        })
        .await;

        match err {
            Some(e) => Err(e),
            None => result,
        }
    }

    /// Transition the run to running and return the snapshot the rest of
    /// the workflow carries.
    async fn get_run(&self, actx: ActivityContext, run_id: i64) -> Result<Run> {
        let _heartbeat = self.start_heartbeat(actx.recorder(), None);

        let mut run = self
            .store
            .update_run(
                run_id,
                &RunUpdate {
                    status: Some(RunStatus::Running),
                    ..Default::default()
                },
            )
            .await?;

        run.stats.execution_start = Some(Utc::now());
        Ok(run)
    }

    /// Persist the documents the connector containers mount: before-state,
    /// both endpoint configs, and the configured catalog. Wipe runs rewrite
    /// every stream to `full_refresh`/`overwrite` first.
    async fn initialize(&self, actx: ActivityContext, wrapper: Arc<RunWrapper>) -> Result<()> {
        let _heartbeat = self.start_heartbeat(actx.recorder(), Some(wrapper.clone()));

        wrapper.update(|run| {
            if !run.options.wipe_destination {
                return;
            }
            let Some(sync) = run.sync.as_mut() else { return };
            let Some(catalog) = sync.configured_catalog.configured_catalog.as_mut() else {
                return;
            };
            for stream in &mut catalog.streams {
                stream.sync_mode = Some(SYNC_MODE_FULL_REFRESH.to_string());
                stream.destination_sync_mode = Some(DESTINATION_SYNC_MODE_OVERWRITE.to_string());
            }
        });

        let run = wrapper.snapshot();
        let sync = run.sync.as_ref().ok_or(EngineError::MissingSnapshot(run.id))?;
        let source = sync
            .source_endpoint
            .as_ref()
            .ok_or(EngineError::MissingSnapshot(run.id))?;
        let destination = sync
            .destination_endpoint
            .as_ref()
            .ok_or(EngineError::MissingSnapshot(run.id))?;

        let artifacts = self.open_artifactory(&run)?;
        artifacts.write(Slot::BeforeState, sync.state.as_ref())?;
        artifacts.write(Slot::SourceConfig, Some(&source.config.to_spec()))?;
        artifacts.write(Slot::DestinationConfig, Some(&destination.config.to_spec()))?;
        artifacts.write(
            Slot::Catalog,
            sync.configured_catalog.configured_catalog.as_ref(),
        )?;
        artifacts.close();

        Ok(())
    }

    /// The streaming pipeline. Retries resume the record tally and state
    /// from the previous attempt's heartbeat details.
    async fn replication(&self, actx: ActivityContext, wrapper: Arc<RunWrapper>) -> Result<()> {
        if let Some(previous) = actx.heartbeat_details::<Run>() {
            wrapper.replace(previous);
        }

        let _heartbeat = self.start_heartbeat(actx.recorder(), Some(wrapper.clone()));
        let attempt = actx.attempt;

        let run = wrapper.snapshot();
        let sync = run.sync.as_ref().ok_or(EngineError::MissingSnapshot(run.id))?;

        let artifacts = Arc::new(self.open_artifactory(&run)?);

        // State may have advanced during a previous attempt; write it out
        // again so the source container resumes from the right place.
        artifacts.write(Slot::BeforeState, sync.state.as_ref())?;

        let worker = artifacts.get_ref(Slot::Worker, attempt)?;

        let result = pipeline::run_replication(
            self.runner.as_ref(),
            &artifacts,
            &wrapper,
            attempt,
            actx.cancel.child_token(),
            &worker,
        )
        .await;

        artifacts.close();
        result
    }

    /// Run the bundled normalization image; capture its output.
    async fn normalization(&self, actx: ActivityContext, wrapper: Arc<RunWrapper>) -> Result<()> {
        let _heartbeat = self.start_heartbeat(actx.recorder(), Some(wrapper.clone()));
        let attempt = actx.attempt;

        let run = wrapper.snapshot();
        let sync = run.sync.as_ref().ok_or(EngineError::MissingSnapshot(run.id))?;
        let destination_connector = sync
            .destination_endpoint
            .as_ref()
            .and_then(|e| e.connector.clone())
            .ok_or(EngineError::MissingSnapshot(run.id))?;
        let basic_normalization = sync.basic_normalization;

        let artifacts = Arc::new(self.open_artifactory(&run)?);
        let worker = artifacts.get_ref(Slot::Worker, attempt)?;
        let normalization_artifact = artifacts.get_ref(Slot::Normalization, attempt)?;

        let cancel = actx.cancel.child_token();
        let (mut items, done) = self
            .runner
            .normalize(
                &destination_connector,
                &artifacts,
                basic_normalization,
                cancel.clone(),
            )
            .await;

        while let Some(item) = items.recv().await {
            match item {
                Item::Message(_) => {}
                Item::Raw(line) => normalization_artifact.println(line),
            }
        }
        cancel.cancel();

        let result = match done.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(EngineError::from(e)),
            Err(_) => Err(EngineError::StageAborted),
        };
        if let Err(e) = &result {
            worker.println(e);
        }

        artifacts.close();
        result
    }

    /// Commit `sync.state` and then the run's terminal status and stats.
    async fn db_update(&self, actx: ActivityContext, wrapper: Arc<RunWrapper>) -> Result<()> {
        let _heartbeat = self.start_heartbeat(actx.recorder(), Some(wrapper.clone()));

        let run = wrapper.snapshot();
        let state = run.sync.as_ref().and_then(|s| s.state.clone());

        // State must land on the sync before the run turns terminal, or the
        // scheduler could create a successor carrying the old state.
        self.store
            .update_sync(
                run.sync_id,
                &SyncUpdate {
                    state: Some(state.clone().unwrap_or(serde_json::Value::Null)),
                    ..Default::default()
                },
            )
            .await?;

        let artifacts = self.open_artifactory(&run)?;
        artifacts.write(Slot::AfterState, state.as_ref())?;
        artifacts.close();

        self.store
            .update_run(
                run.id,
                &RunUpdate {
                    status: Some(run.status),
                    num_records: Some(run.stats.num_records),
                    execution_start: run.stats.execution_start,
                    execution_end: run.stats.execution_end,
                    ..Default::default()
                },
            )
            .await?;

        info!(run_id = run.id, status = %run.status, "run committed");
        Ok(())
    }

    fn open_artifactory(&self, run: &Run) -> Result<Artifactory> {
        Ok(Artifactory::open(
            &self.config.artifact_root,
            run.sync_id,
            run.execution_date,
        )?)
    }

    /// Launch the background heartbeat for one activity attempt.
    ///
    /// Every tick deep-copies the run under its lock, records it as the
    /// heartbeat payload, and best-effort persists the live stats so UIs
    /// see progress. The task stops when the returned guard drops.
    fn start_heartbeat(
        &self,
        recorder: HeartbeatRecorder,
        run: Option<Arc<RunWrapper>>,
    ) -> HeartbeatGuard {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let store = self.store.clone();
        let period = self.config.heartbeat_period;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => return,
                    _ = tokio::time::sleep(period) => {}
                }

                match &run {
                    Some(run) => {
                        let snapshot = run.snapshot();
                        recorder.record(serde_json::to_value(&snapshot).ok());

                        // Best-effort stats update; errors are ignored.
                        let _ = store
                            .update_run(
                                snapshot.id,
                                &RunUpdate {
                                    num_records: Some(snapshot.stats.num_records),
                                    execution_start: snapshot.stats.execution_start,
                                    execution_end: Some(Utc::now()),
                                    ..Default::default()
                                },
                            )
                            .await;
                    }
                    None => recorder.record(None),
                }
            }
        });

        HeartbeatGuard { token, task }
    }
}

/// Stops the heartbeat task when dropped.
struct HeartbeatGuard {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.token.cancel();
        self.task.abort();
    }
}

/// Final status table: success, unless the run was a wipe (wiped), an
/// activity failed (failed), or the workflow was cancelled (canceled).
fn resolve_status(wipe: bool, err: Option<&EngineError>, cancelled: bool) -> RunStatus {
    let mut status = RunStatus::Success;
    if wipe {
        status = RunStatus::Wiped;
    }
    if err.is_some() {
        status = RunStatus::Failed;
    }
    if cancelled {
        status = RunStatus::Canceled;
    }
    status
}
