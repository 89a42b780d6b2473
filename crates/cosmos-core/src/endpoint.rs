// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Endpoints: connectors configured for a particular system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connector::{Connector, ConnectorKind};
use crate::error::{Error, Result};
use crate::form::Form;
use crate::message::Message;

/// A configured instance of a connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: i64,
    pub name: String,
    pub kind: ConnectorKind,
    #[serde(rename = "connectorID")]
    pub connector_id: i64,
    /// Configuration form; must validate against the connector's spec.
    #[serde(default)]
    pub config: Form,
    /// Last discovered catalog, refreshed on create and on demand.
    #[serde(default)]
    pub catalog: Message,
    #[serde(rename = "lastDiscovered", default, skip_serializing_if = "Option::is_none")]
    pub last_discovered: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt", default)]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: DateTime<Utc>,
    /// The connector this endpoint configures, resolved by ID during load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<Connector>,
}

impl Endpoint {
    /// Basic field validation used on create and update.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid("Endpoint name required"));
        }
        if self.connector_id == 0 {
            return Err(Error::invalid("A connector must be selected"));
        }
        Ok(())
    }
}
