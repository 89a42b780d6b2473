// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable activity execution.
//!
//! Activities are retryable units of work with heartbeats. The runner
//! delivers four guarantees the ingestion workflow is built on:
//!
//! 1. Failed attempts retry under an exponential backoff policy.
//! 2. The latest heartbeat payload of a failed attempt is handed to the
//!    next attempt, so activities can resume partial progress.
//! 3. An attempt that stops heartbeating is failed after the heartbeat
//!    timeout, and an attempt that outlives start-to-close is failed; a
//!    timed-out attempt has its token cancelled so stages and child
//!    processes it spawned are torn down before the retry.
//! 4. Cancellation is cooperative: the activity future is never aborted
//!    mid-flight, it observes the token itself; the runner stops retrying
//!    once the token is cancelled.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{EngineError, Result};

/// Exponential backoff policy for activity retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_interval: Duration,
    /// Multiplier applied per attempt.
    pub backoff_coefficient: f64,
    /// Upper bound on the delay between attempts.
    pub maximum_interval: Duration,
    /// Total attempts before the activity fails for good.
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(600),
            maximum_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay between the given (1-based) attempt and the next one.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_coefficient.powi(attempt.saturating_sub(1) as i32);
        self.initial_interval
            .mul_f64(factor)
            .min(self.maximum_interval)
    }
}

/// Options shared by all activities of a workflow.
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    /// Wall-clock budget for a single attempt. Long initial loads run for
    /// days, so this defaults to 72 hours.
    pub start_to_close: Duration,
    /// Maximum silence between heartbeats before the attempt is failed.
    pub heartbeat_timeout: Duration,
    /// Retry policy across attempts.
    pub retry: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close: Duration::from_secs(72 * 60 * 60),
            heartbeat_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct HeartbeatState {
    beats: u64,
    details: Option<Value>,
}

/// Records heartbeats for one activity attempt.
#[derive(Clone)]
pub struct HeartbeatRecorder {
    tx: watch::Sender<HeartbeatState>,
}

impl HeartbeatRecorder {
    /// Record a heartbeat, replacing the attempt's detail payload.
    pub fn record(&self, details: Option<Value>) {
        self.tx.send_modify(|state| {
            state.beats += 1;
            state.details = details;
        });
    }
}

/// Per-attempt context handed to an activity.
pub struct ActivityContext {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Cancellation token of the owning workflow.
    pub cancel: CancellationToken,
    heartbeat_details: Option<Value>,
    recorder: HeartbeatRecorder,
}

impl ActivityContext {
    /// Heartbeat details recorded by the previous attempt, if any.
    pub fn heartbeat_details<T: DeserializeOwned>(&self) -> Option<T> {
        self.heartbeat_details
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// The recorder for this attempt, cloneable into background tasks.
    pub fn recorder(&self) -> HeartbeatRecorder {
        self.recorder.clone()
    }

    /// Record a heartbeat with an optional detail payload.
    pub fn record_heartbeat<T: Serialize>(&self, details: Option<&T>) {
        let details = details.and_then(|d| serde_json::to_value(d).ok());
        self.recorder.record(details);
    }
}

/// Fires when no heartbeat arrives within `timeout`. Never fires once the
/// recorder is gone (the attempt is finishing).
async fn heartbeat_watchdog(mut rx: watch::Receiver<HeartbeatState>, timeout: Duration) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => return,
            changed = rx.changed() => {
                if changed.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

/// Execute an activity under the given options.
///
/// The closure is invoked once per attempt with a fresh [`ActivityContext`].
/// The first `Ok` wins; after `maximum_attempts` failures the last error is
/// returned. Cancellation between attempts short-circuits to
/// [`EngineError::Cancelled`].
pub async fn execute_activity<T, F, Fut>(
    name: &str,
    opts: &ActivityOptions,
    cancel: &CancellationToken,
    mut activity: F,
) -> Result<T>
where
    F: FnMut(ActivityContext) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_details: Option<Value> = None;
    let mut attempt: u32 = 1;

    // Activities never start on an already-cancelled workflow.
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    loop {
        let (tx, rx) = watch::channel(HeartbeatState::default());
        let recorder = HeartbeatRecorder { tx };
        // Each attempt gets its own child token: cancelling the workflow
        // still reaches the attempt, and timing the attempt out must not
        // cancel the workflow.
        let attempt_cancel = cancel.child_token();
        let ctx = ActivityContext {
            attempt,
            cancel: attempt_cancel.clone(),
            heartbeat_details: last_details.clone(),
            recorder,
        };

        let result = tokio::select! {
            result = activity(ctx) => result,
            _ = heartbeat_watchdog(rx.clone(), opts.heartbeat_timeout) => {
                // The abandoned attempt's spawned stages and child processes
                // outlive the dropped future; its token tears them down.
                attempt_cancel.cancel();
                Err(EngineError::HeartbeatTimeout)
            }
            _ = tokio::time::sleep(opts.start_to_close) => {
                attempt_cancel.cancel();
                Err(EngineError::StartToCloseTimeout)
            }
        };

        // Harvest the attempt's last heartbeat payload for the next attempt.
        if let Some(details) = rx.borrow().details.clone() {
            last_details = Some(details);
        }

        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(activity = name, attempt, error = %e, "activity attempt failed");
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                if attempt >= opts.retry.maximum_attempts {
                    return Err(e);
                }
                tokio::select! {
                    _ = tokio::time::sleep(opts.retry.backoff(attempt)) => {}
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_options(max_attempts: u32) -> ActivityOptions {
        ActivityOptions {
            start_to_close: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                initial_interval: Duration::from_millis(5),
                backoff_coefficient: 2.0,
                maximum_interval: Duration::from_millis(20),
                maximum_attempts: max_attempts,
            },
        }
    }

    #[test]
    fn test_backoff_progression() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(60));
        assert_eq!(policy.backoff(2), Duration::from_secs(120));
        assert_eq!(policy.backoff(3), Duration::from_secs(240));
        // Capped at the maximum interval.
        assert_eq!(policy.backoff(4), Duration::from_secs(480));
        assert_eq!(policy.backoff(5), Duration::from_secs(600));
        assert_eq!(policy.backoff(10), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let cancel = CancellationToken::new();
        let result = execute_activity("ok", &fast_options(5), &cancel, |ctx| async move {
            ctx.record_heartbeat::<Value>(None);
            Ok(ctx.attempt)
        })
        .await
        .unwrap();
        assert_eq!(result, 1);
    }

    #[tokio::test]
    async fn test_retries_and_carries_heartbeat_details() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_seen = attempts.clone();

        let result = execute_activity("retry", &fast_options(5), &cancel, move |ctx| {
            let attempts = attempts_seen.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                if ctx.attempt == 1 {
                    // The first attempt makes progress, heartbeats it, then dies.
                    ctx.record_heartbeat(Some(&json!({"numRecords": 5})));
                    return Err(EngineError::StageAborted);
                }
                // The retry resumes from the heartbeat payload.
                let details: Value = ctx.heartbeat_details().expect("details from attempt 1");
                Ok(details["numRecords"].as_u64().unwrap())
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 5);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fails_after_max_attempts() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_seen = attempts.clone();

        let err = execute_activity::<(), _, _>("fail", &fast_options(3), &cancel, move |ctx| {
            let attempts = attempts_seen.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                ctx.record_heartbeat::<Value>(None);
                Err(EngineError::StageAborted)
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::StageAborted));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retries() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let err = execute_activity::<(), _, _>("cancel", &fast_options(5), &cancel, move |_ctx| {
            let token = token.clone();
            async move {
                token.cancel();
                Err(EngineError::StageAborted)
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_heartbeat_timeout_fails_silent_attempt() {
        let cancel = CancellationToken::new();
        let opts = ActivityOptions {
            start_to_close: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_millis(20),
            retry: RetryPolicy {
                initial_interval: Duration::from_millis(1),
                backoff_coefficient: 1.0,
                maximum_interval: Duration::from_millis(1),
                maximum_attempts: 2,
            },
        };

        let err = execute_activity::<(), _, _>("silent", &opts, &cancel, |_ctx| async move {
            // Never heartbeats, never finishes.
            std::future::pending().await
        })
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::HeartbeatTimeout));
    }

    #[tokio::test]
    async fn test_timeout_cancels_abandoned_attempt() {
        let cancel = CancellationToken::new();
        let opts = ActivityOptions {
            start_to_close: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_millis(20),
            retry: RetryPolicy {
                initial_interval: Duration::from_millis(1),
                backoff_coefficient: 1.0,
                maximum_interval: Duration::from_millis(1),
                maximum_attempts: 1,
            },
        };

        let (cancelled_tx, cancelled_rx) = tokio::sync::oneshot::channel();
        let mut cancelled_tx = Some(cancelled_tx);

        let err = execute_activity::<(), _, _>("orphan", &opts, &cancel, move |ctx| {
            let cancelled_tx = cancelled_tx.take();
            async move {
                // A detached worker, like a spawned pipeline stage.
                if let Some(cancelled_tx) = cancelled_tx {
                    let token = ctx.cancel.clone();
                    tokio::spawn(async move {
                        token.cancelled().await;
                        let _ = cancelled_tx.send(());
                    });
                }
                std::future::pending().await
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::HeartbeatTimeout));
        // The abandoned attempt's token was cancelled and reached the worker.
        cancelled_rx.await.unwrap();
        // The workflow itself was not cancelled.
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_heartbeats_keep_attempt_alive() {
        let cancel = CancellationToken::new();
        let opts = ActivityOptions {
            start_to_close: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_millis(40),
            retry: RetryPolicy {
                initial_interval: Duration::from_millis(1),
                backoff_coefficient: 1.0,
                maximum_interval: Duration::from_millis(1),
                maximum_attempts: 1,
            },
        };

        execute_activity("beating", &opts, &cancel, |ctx| async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ctx.record_heartbeat::<Value>(None);
            }
            Ok(())
        })
        .await
        .unwrap();
    }
}
