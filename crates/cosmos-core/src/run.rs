// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runs: single executions of a sync.
//!
//! A run moves `queued → running → {success, failed, canceled, wiped}`.
//! Only terminal runs permit the scheduler to create a successor for the
//! same sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::sync::Sync;

/// Run lifecycle states.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Queued,
    Running,
    Success,
    Failed,
    Canceled,
    Wiped,
}

impl RunStatus {
    /// Whether this status is terminal. Terminal runs are never mutated
    /// again and unblock scheduling of a successor.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Canceled | RunStatus::Wiped
        )
    }
}

/// Progress counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    #[serde(rename = "numRecords")]
    pub num_records: u64,
    #[serde(rename = "executionStart", default, skip_serializing_if = "Option::is_none")]
    pub execution_start: Option<DateTime<Utc>>,
    #[serde(rename = "executionEnd", default, skip_serializing_if = "Option::is_none")]
    pub execution_end: Option<DateTime<Utc>>,
}

/// Options a run was scheduled with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Truncate the destination instead of replicating: every stream is
    /// rewritten to `full_refresh`/`overwrite` and the source reads nothing.
    #[serde(rename = "wipeDestination", default)]
    pub wipe_destination: bool,
}

/// One execution attempt of a sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    #[serde(rename = "syncID")]
    pub sync_id: i64,
    #[serde(rename = "executionDate")]
    pub execution_date: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(default)]
    pub stats: RunStats,
    #[serde(default)]
    pub options: RunOptions,
    /// Durable workflow binding recorded by the run worker.
    #[serde(rename = "workflowID", default)]
    pub workflow_id: String,
    #[serde(rename = "workflowRunID", default)]
    pub workflow_run_id: String,
    /// Snapshot of the sync taken at GetRun; immune to later table edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<Sync>,
}

impl Run {
    /// Whether this run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Run fields that can be updated; unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub num_records: Option<u64>,
    pub execution_start: Option<DateTime<Utc>>,
    pub execution_end: Option<DateTime<Utc>>,
    pub options: Option<RunOptions>,
    pub workflow_id: Option<String>,
    pub workflow_run_id: Option<String>,
}

impl RunUpdate {
    /// Apply the update mask to a run.
    pub fn apply(&self, run: &mut Run) {
        if let Some(v) = self.status {
            run.status = v;
        }
        if let Some(v) = self.num_records {
            run.stats.num_records = v;
        }
        if let Some(v) = self.execution_start {
            run.stats.execution_start = Some(v);
        }
        if let Some(v) = self.execution_end {
            run.stats.execution_end = Some(v);
        }
        if let Some(v) = self.options {
            run.options = v;
        }
        if let Some(v) = &self.workflow_id {
            run.workflow_id = v.clone();
        }
        if let Some(v) = &self.workflow_run_id {
            run.workflow_run_id = v.clone();
        }
    }
}

/// Run search filter.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub id: Option<i64>,
    pub sync_id: Option<i64>,
    pub status: Vec<RunStatus>,
}
