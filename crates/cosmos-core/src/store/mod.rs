// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interface and backends.

pub mod memory;
pub mod postgres;

pub use self::memory::MemStore;
pub use self::postgres::PgStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::run::{Run, RunFilter, RunUpdate};
use crate::sync::{Sync, SyncFilter, SyncUpdate};

/// Persistence operations the run engine and HTTP surface need.
///
/// Runs returned by lookups carry the full object graph: the sync with both
/// endpoints and their connectors, resolved by ID during load.
#[async_trait]
pub trait Store: Send + ::std::marker::Sync {
    /// Find a run by ID, with its sync graph attached. `NotFound` if absent.
    async fn find_run(&self, id: i64) -> Result<Run>;

    /// Find runs matching the filter, newest execution date first.
    async fn find_runs(&self, filter: &RunFilter) -> Result<Vec<Run>>;

    /// Insert a new run. A duplicate `(sync_id, execution_date)` is a
    /// `Conflict`. Returns the run with its assigned ID.
    async fn create_run(&self, run: &Run) -> Result<Run>;

    /// Apply a field-mask update to a run and return the updated row.
    async fn update_run(&self, id: i64, update: &RunUpdate) -> Result<Run>;

    /// The most recent run for a sync, if any.
    async fn last_run_for_sync(&self, sync_id: i64) -> Result<Option<Run>>;

    /// Find a sync by ID, with endpoints and connectors attached.
    async fn find_sync(&self, id: i64) -> Result<Sync>;

    /// Find syncs matching the filter.
    async fn find_syncs(&self, filter: &SyncFilter) -> Result<Vec<Sync>>;

    /// Apply a field-mask update to a sync and return the updated row.
    /// Validates the result before persisting.
    async fn update_sync(&self, id: i64, update: &SyncUpdate) -> Result<Sync>;
}
