// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cosmos Engine - The Run Engine
//!
//! Turns scheduled syncs into durable, resumable, cancellable runs of
//! containerized connector pipelines.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  queued run   ┌────────────┐  workflow_id = sync_id  ┌──────────────────┐
//! │ Scheduler  │──────────────►│ Run Worker │────────────────────────►│ IngestionEngine  │
//! │ (3s sweep) │               │ (3s poll)  │                         │ (dedup, retries, │
//! └────────────┘               └────────────┘                         │  heartbeats)     │
//!                                                                     └────────┬─────────┘
//!                                                                              │ activities
//!                                   ┌──────────────────────────────────────────▼─────────┐
//!                                   │ GetRun → Initialize → Replication → Normalization  │
//!                                   │                  → DBUpdate                        │
//!                                   └──────────────────────────┬─────────────────────────┘
//!                                                              │ 4-stage pipeline
//!                      ┌───────────────────────────────────────▼────────────────────────┐
//!                      │ Source ─► ProcessSource ─► Destination ─► ProcessDest          │
//!                      │ (containers spawned by the ConnectorRunner, artifacts captured)│
//!                      └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! At-most-one-in-flight per sync holds through two independent checks:
//! the engine deduplicates workflows by ID (covering the dispatcher race)
//! and the scheduler refuses successors of non-terminal runs (covering the
//! planner race).

pub mod artifactory;
pub mod durable;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod runner;
pub mod scheduler;
pub mod worker;
pub mod workflow;

pub use artifactory::{Artifactory, Slot};
pub use durable::{ActivityOptions, RetryPolicy};
pub use error::{EngineError, Result};
pub use pipeline::RunWrapper;
pub use runner::{ConnectorRunner, DockerRunner, Item, MockRunner};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use worker::{RunWorker, WorkerConfig};
pub use workflow::{EngineConfig, IngestionEngine, WorkflowHandle};
