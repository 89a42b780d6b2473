// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The sync scheduler.
//!
//! A periodic sweep decides which syncs should produce a new queued run;
//! the UI forces individual syncs through the same path. Sweeps are
//! serialized by a mutex so a burst of forced requests and the periodic
//! sweep cannot race to create duplicate queued runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{error, info};

use cosmos_core::error::{Error, Result};
use cosmos_core::run::{Run, RunOptions, RunStatus};
use cosmos_core::store::Store;
use cosmos_core::sync::{Sync, SyncFilter};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the sweep runs.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
        }
    }
}

/// Creates queued runs for syncs that are due.
pub struct Scheduler {
    store: Arc<dyn Store>,
    config: SchedulerConfig,
    sweep: tokio::sync::Mutex<()>,
    shutdown: Arc<Notify>,
}

impl Scheduler {
    /// Create a scheduler over the given store.
    pub fn new(store: Arc<dyn Store>, config: SchedulerConfig) -> Self {
        Self {
            store,
            config,
            sweep: tokio::sync::Mutex::new(()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the scheduler loop until shutdown.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Scheduler shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.schedule(None, &RunOptions::default()).await {
                        error!(error = %e, "scheduler sweep failed");
                    }
                }
            }
        }
    }

    /// Create queued runs.
    ///
    /// With `sync_id = None` this is the sweep: every sync is considered
    /// and per-sync conflicts are skipped silently. With a sync ID the call
    /// is forced: disabled syncs and unelapsed intervals are overridden,
    /// and any error propagates to the caller.
    pub async fn schedule(&self, sync_id: Option<i64>, options: &RunOptions) -> Result<()> {
        let _guard = self.sweep.lock().await;
        let forced = sync_id.is_some();

        let syncs = self
            .store
            .find_syncs(&SyncFilter {
                id: sync_id,
                ..Default::default()
            })
            .await?;

        if forced && syncs.is_empty() {
            return Err(Error::not_found("Sync not found"));
        }

        for sync in syncs {
            let last = match self.store.last_run_for_sync(sync.id).await {
                Ok(last) => last,
                Err(e) => {
                    if forced {
                        return Err(e);
                    }
                    error!(sync_id = sync.id, error = %e, "scheduler failed to load last run");
                    continue;
                }
            };

            if let Err(e) = ok_to_schedule(&sync, last.as_ref(), forced, Utc::now()) {
                if forced {
                    return Err(e);
                }
                continue;
            }

            let run = Run {
                sync_id: sync.id,
                execution_date: Utc::now(),
                status: RunStatus::Queued,
                options: *options,
                ..Default::default()
            };
            match self.store.create_run(&run).await {
                Ok(created) => {
                    info!(sync_id = sync.id, run_id = created.id, "run queued");
                }
                Err(e) => {
                    if forced {
                        return Err(e);
                    }
                    error!(sync_id = sync.id, error = %e, "scheduler failed to create run");
                }
            }
        }

        Ok(())
    }
}

/// Whether a sync may produce a new run now.
///
/// Conflicts are answers, not faults: a disabled sync, an unelapsed
/// interval, or a run still in flight all return `Conflict`.
pub fn ok_to_schedule(
    sync: &Sync,
    last: Option<&Run>,
    forced: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    if !sync.enabled && !forced {
        return Err(Error::conflict("Not enabled"));
    }
    let Some(last) = last else {
        return Ok(());
    };
    if now - last.execution_date < chrono::Duration::minutes(sync.schedule_interval) && !forced {
        return Err(Error::conflict("Interval has not elapsed"));
    }
    if !last.is_terminal() {
        return Err(Error::conflict("A run is in progress"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmos_core::error::ErrorKind;

    fn sync(enabled: bool, interval: i64) -> Sync {
        Sync {
            id: 7,
            name: "users".to_string(),
            source_endpoint_id: 1,
            destination_endpoint_id: 2,
            enabled,
            schedule_interval: interval,
            ..Default::default()
        }
    }

    fn run_at(status: RunStatus, minutes_ago: i64, now: DateTime<Utc>) -> Run {
        Run {
            sync_id: 7,
            execution_date: now - chrono::Duration::minutes(minutes_ago),
            status,
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_sync_skipped_unless_forced() {
        let now = Utc::now();
        let err = ok_to_schedule(&sync(false, 0), None, false, now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(ok_to_schedule(&sync(false, 0), None, true, now).is_ok());
    }

    #[test]
    fn test_no_previous_run_is_ok() {
        assert!(ok_to_schedule(&sync(true, 60), None, false, Utc::now()).is_ok());
    }

    #[test]
    fn test_interval_not_elapsed() {
        let now = Utc::now();
        let last = run_at(RunStatus::Success, 30, now);
        let err = ok_to_schedule(&sync(true, 60), Some(&last), false, now).unwrap_err();
        assert_eq!(err.public_message(), "Interval has not elapsed");

        // Forcing overrides the interval.
        assert!(ok_to_schedule(&sync(true, 60), Some(&last), true, now).is_ok());
        // So does an elapsed interval.
        let old = run_at(RunStatus::Success, 61, now);
        assert!(ok_to_schedule(&sync(true, 60), Some(&old), false, now).is_ok());
    }

    #[test]
    fn test_zero_interval_disables_interval_check() {
        let now = Utc::now();
        let last = run_at(RunStatus::Success, 0, now);
        assert!(ok_to_schedule(&sync(true, 0), Some(&last), false, now).is_ok());
    }

    #[test]
    fn test_non_terminal_run_blocks_even_forced() {
        let now = Utc::now();
        for status in [RunStatus::Queued, RunStatus::Running] {
            let last = run_at(status, 120, now);
            let err = ok_to_schedule(&sync(true, 60), Some(&last), true, now).unwrap_err();
            assert_eq!(err.public_message(), "A run is in progress");
        }
    }

    #[test]
    fn test_all_terminal_states_unblock() {
        let now = Utc::now();
        for status in [
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Canceled,
            RunStatus::Wiped,
        ] {
            let last = run_at(status, 120, now);
            assert!(ok_to_schedule(&sync(true, 60), Some(&last), false, now).is_ok());
        }
    }
}
