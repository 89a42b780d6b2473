// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! cosmosd - The cosmos control-plane daemon.
//!
//! Wires together the store, the Docker connector runner, the ingestion
//! engine, the scheduler, the run worker, and the HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use cosmos_core::Config;
use cosmos_core::store::PgStore;
use cosmos_engine::http::{self, AppState};
use cosmos_engine::runner::DockerRunner;
use cosmos_engine::scheduler::{Scheduler, SchedulerConfig};
use cosmos_engine::worker::{RunWorker, WorkerConfig};
use cosmos_engine::workflow::{EngineConfig, IngestionEngine};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cosmos_engine=info,cosmos_core=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        artifact_root = %config.artifact_root.display(),
        "Starting cosmosd"
    );

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_pool_size)
        .connect(&config.database_url)
        .await?;
    info!("Connected to database");

    let store = PgStore::new(pool);
    store.ensure_schema().await?;
    info!("Database schema verified");

    let store: Arc<dyn cosmos_core::store::Store> = Arc::new(store);
    let runner = Arc::new(DockerRunner::new(config.scratch_root.clone()));

    let engine = IngestionEngine::new(
        store.clone(),
        runner,
        EngineConfig {
            artifact_root: config.artifact_root.clone(),
            ..Default::default()
        },
    );

    let scheduler = Arc::new(Scheduler::new(store.clone(), SchedulerConfig::default()));
    let scheduler_shutdown = scheduler.shutdown_handle();
    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    let worker = Arc::new(RunWorker::new(
        store.clone(),
        engine.clone(),
        WorkerConfig::default(),
    ));
    let worker_shutdown = worker.shutdown_handle();
    let worker_task = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    let app = http::router(AppState {
        store,
        engine,
        scheduler,
        artifact_root: config.artifact_root,
    });

    let listener = TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP surface ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    scheduler_shutdown.notify_waiters();
    worker_shutdown.notify_waiters();
    let drain = async {
        let _ = scheduler_task.await;
        let _ = worker_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Background loops did not drain within the shutdown grace period");
    }

    info!("cosmosd shut down");
    Ok(())
}
