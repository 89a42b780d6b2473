// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The run worker.
//!
//! Polls for queued runs and binds them to ingestion workflows. The
//! workflow ID is the sync ID, so the engine's per-ID deduplication
//! guarantees at most one in-flight workflow per sync; together with the
//! scheduler's terminal-state check this closes both halves of the
//! at-most-one race.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info};

use cosmos_core::run::{RunFilter, RunStatus, RunUpdate};
use cosmos_core::store::Store;

use crate::workflow::IngestionEngine;

/// Run worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to poll for queued runs.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
        }
    }
}

/// Observes queued runs and starts their workflows.
pub struct RunWorker {
    store: Arc<dyn Store>,
    engine: Arc<IngestionEngine>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl RunWorker {
    /// Create a worker over the given store and engine.
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<IngestionEngine>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the worker loop until shutdown.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Run worker started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Run worker shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.dispatch().await;
                }
            }
        }
    }

    /// Start workflows for every queued run and record their handles.
    pub async fn dispatch(&self) {
        let runs = match self
            .store
            .find_runs(&RunFilter {
                status: vec![RunStatus::Queued],
                ..Default::default()
            })
            .await
        {
            Ok(runs) => runs,
            Err(e) => {
                error!(error = %e, "worker failed to list queued runs");
                return;
            }
        };

        for run in runs {
            // One workflow per sync: a second queued run for the same sync
            // receives the existing handle and no new execution starts.
            let handle = self
                .engine
                .start_ingestion(run.sync_id.to_string(), run.id);

            // The status stays queued here; GetRun marks the run running.
            // If this update fails, the next poll resolves the same handle.
            if let Err(e) = self
                .store
                .update_run(
                    run.id,
                    &RunUpdate {
                        workflow_id: Some(handle.workflow_id),
                        workflow_run_id: Some(handle.workflow_run_id),
                        ..Default::default()
                    },
                )
                .await
            {
                error!(run_id = run.id, error = %e, "worker failed to record workflow handle");
            }
        }
    }
}
