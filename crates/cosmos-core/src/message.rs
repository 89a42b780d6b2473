// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connector protocol messages.
//!
//! Connectors speak a newline-delimited JSON protocol on stdio. Every line is
//! a [`Message`] envelope whose `type` field selects exactly one populated
//! variant. Lines that do not parse and validate as a message are treated as
//! opaque log text by the streaming layers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Message envelope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "RECORD")]
    Record,
    #[serde(rename = "STATE")]
    State,
    #[serde(rename = "LOG")]
    Log,
    #[serde(rename = "SPEC")]
    Spec,
    #[serde(rename = "CONNECTION_STATUS")]
    ConnectionStatus,
    #[serde(rename = "CATALOG")]
    Catalog,
    #[serde(rename = "CONFIGURED_CATALOG")]
    ConfiguredCatalog,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageType::Record => "RECORD",
            MessageType::State => "STATE",
            MessageType::Log => "LOG",
            MessageType::Spec => "SPEC",
            MessageType::ConnectionStatus => "CONNECTION_STATUS",
            MessageType::Catalog => "CATALOG",
            MessageType::ConfiguredCatalog => "CONFIGURED_CATALOG",
        };
        f.write_str(s)
    }
}

/// Sync mode supported by every source regardless of its declared modes.
pub const SYNC_MODE_FULL_REFRESH: &str = "full_refresh";
/// Cursor-based incremental sync mode.
pub const SYNC_MODE_INCREMENTAL: &str = "incremental";

pub const DESTINATION_SYNC_MODE_APPEND: &str = "append";
pub const DESTINATION_SYNC_MODE_OVERWRITE: &str = "overwrite";
pub const DESTINATION_SYNC_MODE_APPEND_DEDUP: &str = "append_dedup";
pub const DESTINATION_SYNC_MODE_UPSERT_DEDUP: &str = "upsert_dedup";

pub const CONNECTION_STATUS_SUCCEEDED: &str = "SUCCEEDED";
pub const CONNECTION_STATUS_FAILED: &str = "FAILED";

/// A single protocol message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<Log>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<Spec>,
    #[serde(rename = "connectionStatus", skip_serializing_if = "Option::is_none")]
    pub connection_status: Option<ConnectionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<Catalog>,
    #[serde(rename = "configuredCatalog", skip_serializing_if = "Option::is_none")]
    pub configured_catalog: Option<ConfiguredCatalog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
}

/// Log line emitted by a connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Log {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub level: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Connector specification: the JSON Schema for its configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    #[serde(rename = "connectionSpecification", default)]
    pub connection_specification: Value,
    #[serde(
        rename = "documentationUrl",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub documentation_url: String,
    #[serde(
        rename = "changelogUrl",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub changelog_url: String,
    #[serde(rename = "supportsIncremental", default)]
    pub supports_incremental: bool,
    #[serde(rename = "supportsNormalization", default)]
    pub supports_normalization: bool,
    #[serde(rename = "supportsDBT", default)]
    pub supports_dbt: bool,
    #[serde(
        rename = "supported_destination_sync_modes",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub supported_destination_sync_modes: Vec<String>,
}

/// A catalog of streams the connector can produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<Stream>,
}

/// A single stream with its declared schema and capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "json_schema", default)]
    pub json_schema: Value,
    #[serde(
        rename = "supported_sync_modes",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub supported_sync_modes: Vec<String>,
    #[serde(rename = "source_defined_cursor", default)]
    pub source_defined_cursor: bool,
    #[serde(
        rename = "default_cursor_field",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub default_cursor_field: Vec<String>,
    #[serde(
        rename = "source_defined_primary_key",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub source_defined_primary_key: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Stream {
    /// Whether the stream supports the given sync mode. `full_refresh` is
    /// supported by all sources even if `supported_sync_modes` is empty.
    pub fn is_sync_mode_available(&self, sync_mode: &str) -> bool {
        sync_mode == SYNC_MODE_FULL_REFRESH
            || self.supported_sync_modes.iter().any(|m| m == sync_mode)
    }
}

/// Catalog after the user has selected streams and modes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredCatalog {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<ConfiguredStream>,
}

/// A selected stream with its sync configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredStream {
    #[serde(default)]
    pub stream: Stream,
    #[serde(rename = "sync_mode", default, skip_serializing_if = "Option::is_none")]
    pub sync_mode: Option<String>,
    #[serde(
        rename = "cursor_field",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub cursor_field: Vec<String>,
    #[serde(
        rename = "destination_sync_mode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub destination_sync_mode: Option<String>,
    #[serde(
        rename = "primary_key",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub primary_key: Vec<Vec<String>>,
}

/// A data record flowing from a source to a destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stream: String,
    #[serde(default)]
    pub data: Value,
    #[serde(rename = "emitted_at", default)]
    pub emitted_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Incremental state, opaque to cosmos and defined by the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub data: Value,
}

/// Result of a `check` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Message {
    /// Parse and validate one protocol line.
    ///
    /// A line is a valid message only when it decodes into the envelope and
    /// the variant field named by `type` is populated. Everything else is an
    /// `Invalid` error; streaming callers downgrade that to opaque log text.
    pub fn parse(raw: &[u8]) -> Result<Message> {
        let msg: Message = serde_json::from_slice(raw)
            .map_err(|e| Error::invalid(format!("Malformed protocol message: {e}")))?;
        msg.validate()?;
        Ok(msg)
    }

    fn validate(&self) -> Result<()> {
        let populated = match self.message_type {
            Some(MessageType::Record) => self.record.is_some(),
            Some(MessageType::State) => self.state.is_some(),
            Some(MessageType::Log) => self.log.is_some(),
            Some(MessageType::Spec) => self.spec.is_some(),
            Some(MessageType::ConnectionStatus) => self.connection_status.is_some(),
            Some(MessageType::Catalog) => self.catalog.is_some(),
            Some(MessageType::ConfiguredCatalog) => self.configured_catalog.is_some(),
            None => false,
        };
        if !populated {
            return Err(Error::invalid(
                "Protocol message does not populate the field named by its type",
            ));
        }
        Ok(())
    }

    /// Shorthand used by the pipeline stages.
    pub fn is_type(&self, t: MessageType) -> bool {
        self.message_type == Some(t)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<unencodable message>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_record_message() {
        let line = br#"{"type":"RECORD","record":{"stream":"users","data":{"id":1},"emitted_at":1700000000}}"#;
        let msg = Message::parse(line).unwrap();
        assert!(msg.is_type(MessageType::Record));
        let record = msg.record.unwrap();
        assert_eq!(record.stream, "users");
        assert_eq!(record.data, json!({"id": 1}));
        assert_eq!(record.emitted_at, 1_700_000_000);
    }

    #[test]
    fn test_parse_state_message() {
        let msg = Message::parse(br#"{"type":"STATE","state":{"data":{"cursor":42}}}"#).unwrap();
        assert!(msg.is_type(MessageType::State));
        assert_eq!(msg.state.unwrap().data, json!({"cursor": 42}));
    }

    #[test]
    fn test_parse_rejects_unpopulated_variant() {
        // Claims to be a record but carries no record payload.
        let err = Message::parse(br#"{"type":"RECORD","state":{"data":{}}}"#).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invalid);
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = Message::parse(b"some plain log output").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invalid);
    }

    #[test]
    fn test_parse_rejects_missing_type() {
        let err = Message::parse(br#"{"record":{"stream":"users"}}"#).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invalid);
    }

    #[test]
    fn test_sync_mode_availability() {
        let stream = Stream {
            name: "users".to_string(),
            supported_sync_modes: vec![SYNC_MODE_INCREMENTAL.to_string()],
            ..Default::default()
        };
        assert!(stream.is_sync_mode_available(SYNC_MODE_INCREMENTAL));
        // full_refresh is always available, even when not declared.
        assert!(stream.is_sync_mode_available(SYNC_MODE_FULL_REFRESH));
        assert!(!stream.is_sync_mode_available("append"));
    }

    #[test]
    fn test_message_round_trip() {
        let msg = Message {
            message_type: Some(MessageType::ConnectionStatus),
            connection_status: Some(ConnectionStatus {
                status: CONNECTION_STATUS_SUCCEEDED.to_string(),
                message: None,
            }),
            ..Default::default()
        };
        let encoded = serde_json::to_vec(&msg).unwrap();
        let decoded = Message::parse(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }
}
