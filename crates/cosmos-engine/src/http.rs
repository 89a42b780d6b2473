// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Thin HTTP surface over the run engine.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/runs/{id}/cancel` | Cancel a run's workflow |
//! | `POST` | `/syncs/{id}/sync-now` | Force-schedule a run |
//! | `GET` | `/artifacts/{run_id}/{artifact_id}` | Raw artifact bytes |
//!
//! Error kinds map to status codes; anything untagged renders as a generic
//! internal error with the original logged.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use serde::Serialize;
use tracing::error;

use cosmos_core::error::{Error, ErrorKind};
use cosmos_core::run::RunOptions;
use cosmos_core::store::Store;

use crate::artifactory::{Artifactory, Slot};
use crate::scheduler::Scheduler;
use crate::workflow::IngestionEngine;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Entity store.
    pub store: Arc<dyn Store>,
    /// Workflow engine, for cancellation.
    pub engine: Arc<IngestionEngine>,
    /// Scheduler, for forced runs.
    pub scheduler: Arc<Scheduler>,
    /// Artifact root, for artifact lookups.
    pub artifact_root: PathBuf,
}

/// Build the engine router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/runs/{id}/cancel", post(cancel_run))
        .route("/syncs/{id}/sync-now", post(sync_now))
        .route("/artifacts/{run_id}/{artifact_id}", get(get_artifact))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Invalid => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> axum::response::Response {
    if err.kind() == ErrorKind::Internal {
        error!(error = %err, "internal error on HTTP surface");
    }
    (
        status_of(err.kind()),
        Json(ErrorBody {
            error: err.public_message(),
        }),
    )
        .into_response()
}

/// `POST /runs/{id}/cancel`: cancel the workflow bound to a run.
async fn cancel_run(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    let run = match state.store.find_run(id).await {
        Ok(run) => run,
        Err(e) => return error_response(e),
    };

    match state
        .engine
        .cancel_workflow(&run.workflow_id, &run.workflow_run_id)
    {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /syncs/{id}/sync-now`: force-schedule a run for a sync.
async fn sync_now(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(options): Json<RunOptions>,
) -> impl IntoResponse {
    match state.scheduler.schedule(Some(id), &options).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /artifacts/{run_id}/{artifact_id}`: raw bytes of one artifact.
async fn get_artifact(
    State(state): State<AppState>,
    Path((run_id, artifact_id)): Path<(i64, String)>,
) -> impl IntoResponse {
    let run = match state.store.find_run(run_id).await {
        Ok(run) => run,
        Err(e) => return error_response(e),
    };

    let Some(slot) = Slot::from_name(&artifact_id) else {
        return error_response(Error::invalid("Unknown artifact"));
    };

    let artifacts = match Artifactory::open(&state.artifact_root, run.sync_id, run.execution_date)
    {
        Ok(artifacts) => artifacts,
        Err(e) => return error_response(e),
    };

    match artifacts.read_bytes(slot) {
        Ok(bytes) => bytes.into_response(),
        Err(e) => error_response(e),
    }
}
