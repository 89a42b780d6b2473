// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use cosmos_core::connector::{Connector, ConnectorKind};
use cosmos_core::endpoint::Endpoint;
use cosmos_core::message::{
    ConfiguredCatalog, ConfiguredStream, Message, MessageType, Stream,
};
use cosmos_core::run::{Run, RunOptions, RunStatus};
use cosmos_core::store::{MemStore, Store};
use cosmos_core::sync::Sync;
use cosmos_engine::durable::{ActivityOptions, RetryPolicy};
use cosmos_engine::runner::MockRunner;
use cosmos_engine::workflow::{EngineConfig, IngestionEngine};

/// A fully wired engine over an in-memory store and a scripted runner.
pub struct Harness {
    pub store: Arc<MemStore>,
    pub runner: Arc<MockRunner>,
    pub engine: Arc<IngestionEngine>,
    pub artifact_root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemStore::new());
        let runner = Arc::new(MockRunner::new());
        let artifact_root = TempDir::new().unwrap();

        let engine = IngestionEngine::new(
            store.clone(),
            runner.clone(),
            EngineConfig {
                artifact_root: artifact_root.path().to_path_buf(),
                heartbeat_period: Duration::from_millis(10),
                activity: ActivityOptions {
                    start_to_close: Duration::from_secs(10),
                    heartbeat_timeout: Duration::from_secs(10),
                    retry: RetryPolicy {
                        initial_interval: Duration::from_millis(10),
                        backoff_coefficient: 2.0,
                        maximum_interval: Duration::from_millis(50),
                        maximum_attempts: 5,
                    },
                },
            },
        );

        Self {
            store,
            runner,
            engine,
            artifact_root,
        }
    }

    /// Seed a sync with its full endpoint/connector graph.
    pub fn seed_sync(&self, sync: Sync) -> Sync {
        self.store.insert_sync(sync)
    }

    /// Insert a queued run for a sync.
    pub async fn queue_run(&self, sync_id: i64, options: RunOptions) -> Run {
        self.store
            .create_run(&Run {
                sync_id,
                execution_date: chrono::Utc::now(),
                status: RunStatus::Queued,
                options,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    /// Poll the store until `predicate` holds for the run, or time out.
    pub async fn wait_for_run(&self, run_id: i64, predicate: impl Fn(&Run) -> bool) -> Run {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let run = self.store.find_run(run_id).await.unwrap();
            if predicate(&run) {
                return run;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("run {run_id} never reached the expected condition: {run:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn connector(id: i64, kind: ConnectorKind, destination_type: &str) -> Connector {
    Connector {
        id,
        name: format!("connector-{id}"),
        kind,
        image: "example/connector".to_string(),
        tag: "1.0".to_string(),
        destination_type: destination_type.to_string(),
        ..Default::default()
    }
}

fn endpoint(id: i64, kind: ConnectorKind, connector: Connector) -> Endpoint {
    Endpoint {
        id,
        name: format!("endpoint-{id}"),
        kind,
        connector_id: connector.id,
        connector: Some(connector),
        ..Default::default()
    }
}

fn configured_stream(name: &str) -> ConfiguredStream {
    ConfiguredStream {
        stream: Stream {
            name: name.to_string(),
            ..Default::default()
        },
        sync_mode: Some("incremental".to_string()),
        destination_sync_mode: Some("append".to_string()),
        ..Default::default()
    }
}

/// A sync with two configured streams, both endpoints, and both connectors.
pub fn full_sync(id: i64) -> Sync {
    Sync {
        id,
        name: format!("sync-{id}"),
        source_endpoint_id: 1,
        destination_endpoint_id: 2,
        enabled: true,
        source_endpoint: Some(endpoint(1, ConnectorKind::Source, connector(1, ConnectorKind::Source, ""))),
        destination_endpoint: Some(endpoint(
            2,
            ConnectorKind::Destination,
            connector(2, ConnectorKind::Destination, "postgres"),
        )),
        configured_catalog: Message {
            message_type: Some(MessageType::ConfiguredCatalog),
            configured_catalog: Some(ConfiguredCatalog {
                streams: vec![configured_stream("users"), configured_stream("orders")],
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}
