// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Syncs: scheduled mappings from a source endpoint to a destination endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::form::Form;
use crate::message::{Message, Record, Stream};

/// Placeholder substituted with the source namespace in custom formats.
pub const SOURCE_NAMESPACE_PLACEHOLDER: &str = "${SOURCE_NAMESPACE}";

/// How destination namespaces are derived from source namespaces.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NamespaceDefinition {
    /// Keep the namespace the source declared.
    #[default]
    Source,
    /// Let the destination pick its default namespace.
    Destination,
    /// Render `namespace_format`, substituting `${SOURCE_NAMESPACE}`.
    Custom,
}

/// A scheduled source → destination mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sync {
    pub id: i64,
    pub name: String,
    #[serde(rename = "sourceEndpointID")]
    pub source_endpoint_id: i64,
    #[serde(rename = "destinationEndpointID")]
    pub destination_endpoint_id: i64,
    /// Minutes between runs; 0 disables interval scheduling.
    #[serde(rename = "scheduleInterval")]
    pub schedule_interval: i64,
    pub enabled: bool,
    #[serde(rename = "basicNormalization")]
    pub basic_normalization: bool,
    #[serde(rename = "namespaceDefinition", default)]
    pub namespace_definition: NamespaceDefinition,
    #[serde(rename = "namespaceFormat", default)]
    pub namespace_format: String,
    #[serde(rename = "streamPrefix", default)]
    pub stream_prefix: String,
    /// Incremental state, opaque and source-defined. Mutated only from
    /// destination-acknowledged state messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    /// Catalog selection form.
    #[serde(default)]
    pub config: Form,
    /// Configured catalog message projected from `config`.
    #[serde(rename = "configuredCatalog", default)]
    pub configured_catalog: Message,
    #[serde(rename = "createdAt", default)]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "sourceEndpoint", default, skip_serializing_if = "Option::is_none")]
    pub source_endpoint: Option<Endpoint>,
    #[serde(
        rename = "destinationEndpoint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub destination_endpoint: Option<Endpoint>,
}

impl Sync {
    /// Basic field validation used on create and update.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid("Sync name required"));
        }
        if self.source_endpoint_id == 0 {
            return Err(Error::invalid("A source endpoint must be selected"));
        }
        if self.destination_endpoint_id == 0 {
            return Err(Error::invalid("A destination endpoint must be selected"));
        }
        if self.schedule_interval < 0 {
            return Err(Error::invalid(
                "Schedule interval must be greater than or equal to 0",
            ));
        }
        if self.namespace_definition == NamespaceDefinition::Custom
            && self.namespace_format.trim().is_empty()
        {
            return Err(Error::invalid(
                "Custom namespace definition requires a non-empty namespace format",
            ));
        }
        Ok(())
    }

    fn map_namespace(&self, namespace: Option<String>) -> Option<String> {
        match self.namespace_definition {
            NamespaceDefinition::Source => namespace,
            NamespaceDefinition::Destination => None,
            NamespaceDefinition::Custom => {
                let source_namespace = namespace.unwrap_or_default();
                Some(
                    self.namespace_format
                        .replace(SOURCE_NAMESPACE_PLACEHOLDER, &source_namespace),
                )
            }
        }
    }

    /// Apply the stream prefix and namespace policy to a catalog stream.
    pub fn map_stream(&self, stream: &mut Stream) {
        stream.name = format!("{}{}", self.stream_prefix, stream.name);
        stream.namespace = self.map_namespace(stream.namespace.take());
    }

    /// Apply the stream prefix and namespace policy to a record.
    pub fn map_record(&self, record: &mut Record) {
        record.stream = format!("{}{}", self.stream_prefix, record.stream);
        record.namespace = self.map_namespace(record.namespace.take());
    }
}

/// Sync fields that can be updated; unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SyncUpdate {
    pub name: Option<String>,
    pub config: Option<Form>,
    pub schedule_interval: Option<i64>,
    pub enabled: Option<bool>,
    pub basic_normalization: Option<bool>,
    pub namespace_definition: Option<NamespaceDefinition>,
    pub namespace_format: Option<String>,
    pub stream_prefix: Option<String>,
    pub state: Option<Value>,
}

impl SyncUpdate {
    /// Apply the update mask to a sync. An empty state object clears the
    /// state entirely.
    pub fn apply(&self, sync: &mut Sync) {
        if let Some(v) = &self.name {
            sync.name = v.clone();
        }
        if let Some(v) = self.schedule_interval {
            sync.schedule_interval = v;
        }
        if let Some(v) = self.enabled {
            sync.enabled = v;
        }
        if let Some(v) = self.basic_normalization {
            sync.basic_normalization = v;
        }
        if let Some(v) = self.namespace_definition {
            sync.namespace_definition = v;
        }
        if let Some(v) = &self.namespace_format {
            sync.namespace_format = v.clone();
        }
        if let Some(v) = &self.stream_prefix {
            sync.stream_prefix = v.clone();
        }
        if let Some(v) = &self.config {
            sync.config = v.clone();
        }
        if let Some(v) = &self.state {
            // Null and the empty object both clear the state.
            sync.state = match v {
                Value::Null => None,
                Value::Object(map) if map.is_empty() => None,
                _ => Some(v.clone()),
            };
        }
    }
}

/// Sync search filter.
#[derive(Debug, Clone, Default)]
pub struct SyncFilter {
    pub id: Option<i64>,
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sync() -> Sync {
        Sync {
            name: "users-to-warehouse".to_string(),
            source_endpoint_id: 1,
            destination_endpoint_id: 2,
            schedule_interval: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate() {
        assert!(sync().validate().is_ok());

        let mut s = sync();
        s.schedule_interval = -1;
        assert!(s.validate().is_err());

        let mut s = sync();
        s.destination_endpoint_id = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_custom_namespace_requires_format() {
        let mut s = sync();
        s.namespace_definition = NamespaceDefinition::Custom;
        s.namespace_format = "  ".to_string();
        assert!(s.validate().is_err());

        s.namespace_format = "analytics_${SOURCE_NAMESPACE}".to_string();
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_map_record_source_definition_keeps_namespace() {
        let mut s = sync();
        s.stream_prefix = "raw_".to_string();

        let mut record = Record {
            stream: "users".to_string(),
            namespace: Some("public".to_string()),
            ..Default::default()
        };
        s.map_record(&mut record);
        assert_eq!(record.stream, "raw_users");
        assert_eq!(record.namespace.as_deref(), Some("public"));
    }

    #[test]
    fn test_map_stream_destination_definition_clears_namespace() {
        let mut s = sync();
        s.namespace_definition = NamespaceDefinition::Destination;

        let mut stream = Stream {
            name: "users".to_string(),
            namespace: Some("public".to_string()),
            ..Default::default()
        };
        s.map_stream(&mut stream);
        assert_eq!(stream.namespace, None);
    }

    #[test]
    fn test_map_stream_custom_definition_substitutes_placeholder() {
        let mut s = sync();
        s.namespace_definition = NamespaceDefinition::Custom;
        s.namespace_format = "analytics_${SOURCE_NAMESPACE}".to_string();

        let mut stream = Stream {
            name: "users".to_string(),
            namespace: Some("public".to_string()),
            ..Default::default()
        };
        s.map_stream(&mut stream);
        assert_eq!(stream.namespace.as_deref(), Some("analytics_public"));

        // Absent source namespace substitutes the empty string.
        let mut stream = Stream {
            name: "users".to_string(),
            namespace: None,
            ..Default::default()
        };
        s.map_stream(&mut stream);
        assert_eq!(stream.namespace.as_deref(), Some("analytics_"));
    }

    #[test]
    fn test_update_apply_clears_empty_state() {
        let mut s = sync();
        s.state = Some(json!({"cursor": 42}));

        SyncUpdate {
            state: Some(json!({})),
            ..Default::default()
        }
        .apply(&mut s);
        assert_eq!(s.state, None);

        SyncUpdate {
            state: Some(json!({"cursor": 43})),
            ..Default::default()
        }
        .apply(&mut s);
        assert_eq!(s.state, Some(json!({"cursor": 43})));
    }

    #[test]
    fn test_sync_serde_round_trip() {
        let mut s = sync();
        s.state = Some(json!({"cursor": 42}));
        s.config = Form {
            form_type: "CATALOG".to_string(),
            ..Default::default()
        };
        let encoded = serde_json::to_string(&s).unwrap();
        let decoded: Sync = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, s);
    }
}
