// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Postgres-backed store.
//!
//! Documents (forms, catalogs, specs, state) live in JSONB columns; unique
//! constraint violations surface as `Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use super::Store;
use crate::connector::{Connector, ConnectorKind};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result, is_unique_violation};
use crate::form::Form;
use crate::message::Message;
use crate::run::{Run, RunFilter, RunOptions, RunStats, RunStatus, RunUpdate};
use crate::sync::{NamespaceDefinition, Sync, SyncFilter, SyncUpdate};

/// Postgres implementation of [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create entity tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/schema.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_connector(&self, id: i64) -> Result<Connector> {
        let row = sqlx::query_as::<_, ConnectorRow>(
            r#"
            SELECT id, name, kind, image, tag, destination_type, spec, created_at, updated_at
            FROM connectors
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("Connector not found"))?;
        Ok(row.into())
    }

    async fn load_endpoint(&self, id: i64) -> Result<Endpoint> {
        let row = sqlx::query_as::<_, EndpointRow>(
            r#"
            SELECT id, name, kind, connector_id, config, catalog, last_discovered,
                   created_at, updated_at
            FROM endpoints
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("Endpoint not found"))?;

        let mut endpoint: Endpoint = row.into();
        endpoint.connector = Some(self.load_connector(endpoint.connector_id).await?);
        Ok(endpoint)
    }

    async fn attach_sync_graph(&self, mut sync: Sync) -> Result<Sync> {
        sync.source_endpoint = Some(self.load_endpoint(sync.source_endpoint_id).await?);
        sync.destination_endpoint = Some(self.load_endpoint(sync.destination_endpoint_id).await?);
        Ok(sync)
    }

    async fn attach_run_graph(&self, mut run: Run) -> Result<Run> {
        run.sync = Some(self.find_sync(run.sync_id).await?);
        Ok(run)
    }
}

#[derive(sqlx::FromRow)]
struct ConnectorRow {
    id: i64,
    name: String,
    kind: String,
    image: String,
    tag: String,
    destination_type: String,
    spec: Json<Message>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConnectorRow> for Connector {
    fn from(row: ConnectorRow) -> Self {
        Connector {
            id: row.id,
            name: row.name,
            kind: row.kind.parse().unwrap_or(ConnectorKind::Source),
            image: row.image,
            tag: row.tag,
            destination_type: row.destination_type,
            spec: row.spec.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EndpointRow {
    id: i64,
    name: String,
    kind: String,
    connector_id: i64,
    config: Json<Form>,
    catalog: Json<Message>,
    last_discovered: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EndpointRow> for Endpoint {
    fn from(row: EndpointRow) -> Self {
        Endpoint {
            id: row.id,
            name: row.name,
            kind: row.kind.parse().unwrap_or(ConnectorKind::Source),
            connector_id: row.connector_id,
            config: row.config.0,
            catalog: row.catalog.0,
            last_discovered: row.last_discovered,
            created_at: row.created_at,
            updated_at: row.updated_at,
            connector: None,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SyncRow {
    id: i64,
    name: String,
    source_endpoint_id: i64,
    destination_endpoint_id: i64,
    schedule_interval: i64,
    enabled: bool,
    basic_normalization: bool,
    namespace_definition: String,
    namespace_format: String,
    stream_prefix: String,
    state: Option<Json<serde_json::Value>>,
    config: Json<Form>,
    configured_catalog: Json<Message>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SyncRow> for Sync {
    fn from(row: SyncRow) -> Self {
        Sync {
            id: row.id,
            name: row.name,
            source_endpoint_id: row.source_endpoint_id,
            destination_endpoint_id: row.destination_endpoint_id,
            schedule_interval: row.schedule_interval,
            enabled: row.enabled,
            basic_normalization: row.basic_normalization,
            namespace_definition: row
                .namespace_definition
                .parse()
                .unwrap_or(NamespaceDefinition::Source),
            namespace_format: row.namespace_format,
            stream_prefix: row.stream_prefix,
            state: row.state.map(|s| s.0),
            config: row.config.0,
            configured_catalog: row.configured_catalog.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            source_endpoint: None,
            destination_endpoint: None,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: i64,
    sync_id: i64,
    execution_date: DateTime<Utc>,
    status: String,
    num_records: i64,
    execution_start: Option<DateTime<Utc>>,
    execution_end: Option<DateTime<Utc>>,
    options: Json<RunOptions>,
    workflow_id: String,
    workflow_run_id: String,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        Run {
            id: row.id,
            sync_id: row.sync_id,
            execution_date: row.execution_date,
            status: row.status.parse().unwrap_or(RunStatus::Queued),
            stats: RunStats {
                num_records: row.num_records.max(0) as u64,
                execution_start: row.execution_start,
                execution_end: row.execution_end,
            },
            options: row.options.0,
            workflow_id: row.workflow_id,
            workflow_run_id: row.workflow_run_id,
            sync: None,
        }
    }
}

const RUN_COLUMNS: &str = "id, sync_id, execution_date, status, num_records, \
     execution_start, execution_end, options, workflow_id, workflow_run_id";

#[async_trait]
impl Store for PgStore {
    async fn find_run(&self, id: i64) -> Result<Run> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("Run not found"))?;
        self.attach_run_graph(row.into()).await
    }

    async fn find_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let statuses: Vec<String> = filter.status.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS} FROM runs
            WHERE ($1::bigint IS NULL OR id = $1)
              AND ($2::bigint IS NULL OR sync_id = $2)
              AND (cardinality($3::text[]) = 0 OR status = ANY($3))
            ORDER BY execution_date DESC
            "#
        ))
        .bind(filter.id)
        .bind(filter.sync_id)
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            runs.push(self.attach_run_graph(row.into()).await?);
        }
        Ok(runs)
    }

    async fn create_run(&self, run: &Run) -> Result<Run> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            INSERT INTO runs (sync_id, execution_date, status, num_records, options,
                              workflow_id, workflow_run_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(run.sync_id)
        .bind(run.execution_date)
        .bind(run.status.to_string())
        .bind(run.stats.num_records as i64)
        .bind(Json(&run.options))
        .bind(&run.workflow_id)
        .bind(&run.workflow_run_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict("A run already exists for this execution date")
            } else {
                Error::Database(e)
            }
        })?;
        self.attach_run_graph(row.into()).await
    }

    async fn update_run(&self, id: i64, update: &RunUpdate) -> Result<Run> {
        let mut run = self.find_run(id).await?;
        update.apply(&mut run);

        sqlx::query(
            r#"
            UPDATE runs
            SET status = $2, num_records = $3, execution_start = $4, execution_end = $5,
                options = $6, workflow_id = $7, workflow_run_id = $8
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(run.status.to_string())
        .bind(run.stats.num_records as i64)
        .bind(run.stats.execution_start)
        .bind(run.stats.execution_end)
        .bind(Json(&run.options))
        .bind(&run.workflow_id)
        .bind(&run.workflow_run_id)
        .execute(&self.pool)
        .await?;

        Ok(run)
    }

    async fn last_run_for_sync(&self, sync_id: i64) -> Result<Option<Run>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS} FROM runs
            WHERE sync_id = $1
            ORDER BY execution_date DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(sync_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.attach_run_graph(row.into()).await?)),
            None => Ok(None),
        }
    }

    async fn find_sync(&self, id: i64) -> Result<Sync> {
        let row = sqlx::query_as::<_, SyncRow>(
            r#"
            SELECT id, name, source_endpoint_id, destination_endpoint_id, schedule_interval,
                   enabled, basic_normalization, namespace_definition, namespace_format,
                   stream_prefix, state, config, configured_catalog, created_at, updated_at
            FROM syncs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("Sync not found"))?;
        self.attach_sync_graph(row.into()).await
    }

    async fn find_syncs(&self, filter: &SyncFilter) -> Result<Vec<Sync>> {
        let rows = sqlx::query_as::<_, SyncRow>(
            r#"
            SELECT id, name, source_endpoint_id, destination_endpoint_id, schedule_interval,
                   enabled, basic_normalization, namespace_definition, namespace_format,
                   stream_prefix, state, config, configured_catalog, created_at, updated_at
            FROM syncs
            WHERE ($1::bigint IS NULL OR id = $1)
              AND ($2::text IS NULL OR name = $2)
            ORDER BY id
            "#,
        )
        .bind(filter.id)
        .bind(&filter.name)
        .fetch_all(&self.pool)
        .await?;

        let mut syncs = Vec::with_capacity(rows.len());
        for row in rows {
            syncs.push(self.attach_sync_graph(row.into()).await?);
        }
        Ok(syncs)
    }

    async fn update_sync(&self, id: i64, update: &SyncUpdate) -> Result<Sync> {
        let mut sync = self.find_sync(id).await?;
        update.apply(&mut sync);
        sync.validate()?;
        sync.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE syncs
            SET name = $2, schedule_interval = $3, enabled = $4, basic_normalization = $5,
                namespace_definition = $6, namespace_format = $7, stream_prefix = $8,
                state = $9, config = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&sync.name)
        .bind(sync.schedule_interval)
        .bind(sync.enabled)
        .bind(sync.basic_normalization)
        .bind(sync.namespace_definition.to_string())
        .bind(&sync.namespace_format)
        .bind(&sync.stream_prefix)
        .bind(sync.state.as_ref().map(Json))
        .bind(Json(&sync.config))
        .bind(sync.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict("A sync with this name already exists")
            } else {
                Error::Database(e)
            }
        })?;

        Ok(sync)
    }
}
