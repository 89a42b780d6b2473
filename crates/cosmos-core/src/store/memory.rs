// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store for tests and embedded use.
//!
//! Enforces the same uniqueness invariants as the Postgres backend so the
//! run engine can be exercised without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::Store;
use crate::error::{Error, Result};
use crate::run::{Run, RunFilter, RunUpdate};
use crate::sync::{Sync, SyncFilter, SyncUpdate};

#[derive(Default)]
struct Inner {
    syncs: HashMap<i64, Sync>,
    runs: HashMap<i64, Run>,
    next_run_id: i64,
    next_sync_id: i64,
}

/// Mutex-guarded in-memory implementation of [`Store`].
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a sync, assigning an ID if the sync has none.
    pub fn insert_sync(&self, mut sync: Sync) -> Sync {
        let mut inner = self.inner.lock().unwrap();
        if sync.id == 0 {
            inner.next_sync_id += 1;
            sync.id = inner.next_sync_id;
        } else {
            inner.next_sync_id = inner.next_sync_id.max(sync.id);
        }
        inner.syncs.insert(sync.id, sync.clone());
        sync
    }

    fn attach_graph(inner: &Inner, mut run: Run) -> Run {
        run.sync = inner.syncs.get(&run.sync_id).cloned();
        run
    }
}

#[async_trait]
impl Store for MemStore {
    async fn find_run(&self, id: i64) -> Result<Run> {
        let inner = self.inner.lock().unwrap();
        inner
            .runs
            .get(&id)
            .cloned()
            .map(|run| Self::attach_graph(&inner, run))
            .ok_or_else(|| Error::not_found("Run not found"))
    }

    async fn find_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let inner = self.inner.lock().unwrap();
        let mut runs: Vec<Run> = inner
            .runs
            .values()
            .filter(|run| filter.id.is_none_or(|id| run.id == id))
            .filter(|run| filter.sync_id.is_none_or(|id| run.sync_id == id))
            .filter(|run| filter.status.is_empty() || filter.status.contains(&run.status))
            .cloned()
            .map(|run| Self::attach_graph(&inner, run))
            .collect();
        runs.sort_by(|a, b| b.execution_date.cmp(&a.execution_date));
        Ok(runs)
    }

    async fn create_run(&self, run: &Run) -> Result<Run> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .runs
            .values()
            .any(|r| r.sync_id == run.sync_id && r.execution_date == run.execution_date)
        {
            return Err(Error::conflict("A run already exists for this execution date"));
        }

        inner.next_run_id += 1;
        let mut created = run.clone();
        created.id = inner.next_run_id;
        created.sync = None;
        inner.runs.insert(created.id, created.clone());
        Ok(Self::attach_graph(&inner, created))
    }

    async fn update_run(&self, id: i64, update: &RunUpdate) -> Result<Run> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Run not found"))?;
        update.apply(run);
        let run = run.clone();
        Ok(Self::attach_graph(&inner, run))
    }

    async fn last_run_for_sync(&self, sync_id: i64) -> Result<Option<Run>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .runs
            .values()
            .filter(|run| run.sync_id == sync_id)
            .max_by_key(|run| (run.execution_date, run.id))
            .cloned()
            .map(|run| Self::attach_graph(&inner, run)))
    }

    async fn find_sync(&self, id: i64) -> Result<Sync> {
        let inner = self.inner.lock().unwrap();
        inner
            .syncs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("Sync not found"))
    }

    async fn find_syncs(&self, filter: &SyncFilter) -> Result<Vec<Sync>> {
        let inner = self.inner.lock().unwrap();
        let mut syncs: Vec<Sync> = inner
            .syncs
            .values()
            .filter(|sync| filter.id.is_none_or(|id| sync.id == id))
            .filter(|sync| {
                filter
                    .name
                    .as_ref()
                    .is_none_or(|name| &sync.name == name)
            })
            .cloned()
            .collect();
        syncs.sort_by_key(|sync| sync.id);
        Ok(syncs)
    }

    async fn update_sync(&self, id: i64, update: &SyncUpdate) -> Result<Sync> {
        let mut inner = self.inner.lock().unwrap();
        let sync = inner
            .syncs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Sync not found"))?;
        update.apply(sync);
        sync.validate()?;
        sync.updated_at = Utc::now();
        Ok(sync.clone())
    }
}
