// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connectors: versioned container images implementing the stdio protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Error, Result};
use crate::message::Message;

/// Whether a connector produces or consumes records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectorKind {
    #[default]
    Source,
    Destination,
}

/// Destination types the bundled normalization image understands.
pub const DESTINATION_TYPES: &[&str] = &[
    "postgres",
    "bigquery",
    "redshift",
    "snowflake",
    "mysql",
    "other",
];

/// A source or destination connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub id: i64,
    pub name: String,
    pub kind: ConnectorKind,
    /// Container image name, without the tag.
    pub image: String,
    /// Container image tag.
    pub tag: String,
    /// Destination flavor for normalization; empty for sources.
    #[serde(rename = "destinationType", default)]
    pub destination_type: String,
    /// Cached `spec` protocol response.
    #[serde(default)]
    pub spec: Message,
    #[serde(rename = "createdAt", default)]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: DateTime<Utc>,
}

impl Connector {
    /// `image:tag` as handed to the container runtime.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    fn has_valid_destination_type(&self) -> bool {
        match self.kind {
            ConnectorKind::Source => self.destination_type.is_empty(),
            ConnectorKind::Destination => DESTINATION_TYPES
                .iter()
                .any(|t| *t == self.destination_type),
        }
    }

    /// Basic field validation used on create and update.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid("Connector name required"));
        }
        if self.image.is_empty() || self.tag.is_empty() {
            return Err(Error::invalid("Container image name and tag are required"));
        }
        if !self.has_valid_destination_type() {
            return Err(Error::invalid("Invalid destination type"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector(kind: ConnectorKind, destination_type: &str) -> Connector {
        Connector {
            name: "pg".to_string(),
            kind,
            image: "airbyte/source-postgres".to_string(),
            tag: "0.3.0".to_string(),
            destination_type: destination_type.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_source() {
        assert!(connector(ConnectorKind::Source, "").validate().is_ok());
        // Sources must not carry a destination type.
        assert!(
            connector(ConnectorKind::Source, "postgres")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_validate_destination_type() {
        assert!(
            connector(ConnectorKind::Destination, "snowflake")
                .validate()
                .is_ok()
        );
        assert!(
            connector(ConnectorKind::Destination, "oracle")
                .validate()
                .is_err()
        );
        assert!(connector(ConnectorKind::Destination, "").validate().is_err());
    }

    #[test]
    fn test_validate_requires_image_and_name() {
        let mut c = connector(ConnectorKind::Source, "");
        c.tag.clear();
        assert!(c.validate().is_err());

        let mut c = connector(ConnectorKind::Source, "");
        c.name.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_image_ref() {
        let c = connector(ConnectorKind::Source, "");
        assert_eq!(c.image_ref(), "airbyte/source-postgres:0.3.0");
    }

    #[test]
    fn test_kind_round_trip() {
        assert_eq!(ConnectorKind::Destination.to_string(), "destination");
        assert_eq!(
            "source".parse::<ConnectorKind>().unwrap(),
            ConnectorKind::Source
        );
    }
}
