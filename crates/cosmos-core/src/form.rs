// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Editable form representation of connector configuration and catalogs.
//!
//! The UI edits flat field lists; `to_spec` and `to_configured_catalog`
//! project them back into the JSON documents the connectors consume. The
//! documents are plain [`serde_json::Value`] trees.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::message::{
    DESTINATION_SYNC_MODE_APPEND_DEDUP, DESTINATION_SYNC_MODE_UPSERT_DEDUP, MessageType,
    SYNC_MODE_INCREMENTAL, Stream,
};

/// Form flavors.
pub const FORM_TYPE_SPEC: &str = "SPEC";
pub const FORM_TYPE_CATALOG: &str = "CATALOG";

/// A configuration form captured from the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Form {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub form_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spec: Vec<FormFieldSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catalog: Vec<FormFieldCatalog>,
}

/// One leaf field of a connector configuration form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormFieldSpec {
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub r#enum: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#const: Option<Value>,
    #[serde(default)]
    pub secret: bool,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "dependsOnIdx", default, skip_serializing_if = "Option::is_none")]
    pub depends_on_idx: Option<usize>,
    #[serde(rename = "dependsOnValue", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on_value: Vec<Value>,
    #[serde(rename = "oneOfKey", default)]
    pub one_of_key: bool,
    #[serde(default)]
    pub ignore: bool,
}

/// One stream row of a catalog selection form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormFieldCatalog {
    #[serde(default)]
    pub stream: Stream,
    #[serde(rename = "streamName", default, skip_serializing_if = "String::is_empty")]
    pub stream_name: String,
    #[serde(rename = "isStreamSelected", default)]
    pub is_stream_selected: bool,
    #[serde(rename = "syncModes", default, skip_serializing_if = "Vec::is_empty")]
    pub sync_modes: Vec<Vec<String>>,
    #[serde(rename = "selectedSyncMode", default, skip_serializing_if = "Vec::is_empty")]
    pub selected_sync_mode: Vec<String>,
    #[serde(rename = "cursorFields", default, skip_serializing_if = "Vec::is_empty")]
    pub cursor_fields: Vec<Vec<String>>,
    #[serde(
        rename = "selectedCursorField",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub selected_cursor_field: Vec<String>,
    #[serde(rename = "primaryKeys", default, skip_serializing_if = "Vec::is_empty")]
    pub primary_keys: Vec<Vec<String>>,
    #[serde(
        rename = "selectedPrimaryKey",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub selected_primary_key: Vec<Vec<String>>,
}

/// A `oneOf` branch marker path segment: `<<0>>`, `<<1>>`, ...
fn is_one_of_segment(segment: &str) -> bool {
    segment
        .strip_prefix("<<")
        .and_then(|s| s.strip_suffix(">>"))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

impl FormFieldSpec {
    fn depends_on_values_include(&self, value: Option<&Value>) -> bool {
        match value {
            Some(v) => self.depends_on_value.contains(v),
            None => false,
        }
    }
}

impl Form {
    /// Project the spec form into the configuration document handed to the
    /// connector's `check`/`discover`/`read`/`write` invocations.
    pub fn to_spec(&self) -> Value {
        let mut result = Map::new();

        for field in &self.spec {
            if field.ignore {
                continue;
            }
            if field.value.is_none() && !field.required {
                continue;
            }
            if let Some(idx) = field.depends_on_idx {
                let selected = self.spec.get(idx).and_then(|dep| dep.value.as_ref());
                if !field.depends_on_values_include(selected) {
                    continue;
                }
            }
            let Some((leaf, parents)) = field.path.split_last() else {
                continue;
            };

            let mut node = &mut result;
            for p in parents {
                if is_one_of_segment(p) {
                    continue;
                }
                let entry = node
                    .entry(p.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                // A scalar already at this path loses to the deeper field.
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                node = entry.as_object_mut().expect("normalized to an object above");
            }
            node.insert(leaf.clone(), field.value.clone().unwrap_or(Value::Null));
        }

        Value::Object(result)
    }

    /// Project the catalog form into a configured-catalog message document.
    ///
    /// Only selected streams are emitted; a cursor field only accompanies
    /// incremental mode and a primary key only the dedup destination modes.
    pub fn to_configured_catalog(&self) -> Value {
        let mut streams = Vec::new();

        for field in &self.catalog {
            if !field.is_stream_selected {
                continue;
            }

            let mut m = Map::new();
            m.insert(
                "stream".to_string(),
                serde_json::to_value(&field.stream).unwrap_or(Value::Null),
            );

            if let Some(sync_mode) = field.selected_sync_mode.first() {
                m.insert("sync_mode".to_string(), json!(sync_mode));
                if sync_mode == SYNC_MODE_INCREMENTAL && !field.selected_cursor_field.is_empty() {
                    m.insert("cursor_field".to_string(), json!(field.selected_cursor_field));
                }
            }

            if let Some(dst_mode) = field.selected_sync_mode.get(1) {
                m.insert("destination_sync_mode".to_string(), json!(dst_mode));
                if (dst_mode == DESTINATION_SYNC_MODE_APPEND_DEDUP
                    || dst_mode == DESTINATION_SYNC_MODE_UPSERT_DEDUP)
                    && !field.selected_primary_key.is_empty()
                {
                    m.insert("primary_key".to_string(), json!(field.selected_primary_key));
                }
            }

            streams.push(Value::Object(m));
        }

        json!({
            "type": MessageType::ConfiguredCatalog,
            "configuredCatalog": { "streams": streams },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn field(path: &[&str], value: Option<Value>) -> FormFieldSpec {
        FormFieldSpec {
            path: path.iter().map(|s| s.to_string()).collect(),
            value,
            ..Default::default()
        }
    }

    #[test]
    fn test_to_spec_builds_nested_document() {
        let form = Form {
            form_type: FORM_TYPE_SPEC.to_string(),
            spec: vec![
                field(&["host"], Some(json!("db.example.com"))),
                field(&["credentials", "username"], Some(json!("admin"))),
                field(&["credentials", "password"], Some(json!("hunter2"))),
            ],
            ..Default::default()
        };

        assert_eq!(
            form.to_spec(),
            json!({
                "host": "db.example.com",
                "credentials": {"username": "admin", "password": "hunter2"},
            })
        );
    }

    #[test]
    fn test_to_spec_skips_ignored_and_empty_optional_fields() {
        let mut ignored = field(&["nope"], Some(json!(1)));
        ignored.ignore = true;

        let form = Form {
            form_type: FORM_TYPE_SPEC.to_string(),
            spec: vec![
                ignored,
                field(&["absent_optional"], None),
                field(&["kept"], Some(json!(true))),
            ],
            ..Default::default()
        };

        assert_eq!(form.to_spec(), json!({"kept": true}));
    }

    #[test]
    fn test_to_spec_collapses_one_of_segments_and_dependencies() {
        let mut method = field(&["tunnel", "<<0>>", "tunnel_method"], Some(json!("SSH")));
        method.one_of_key = true;
        method.r#enum = vec![json!("SSH"), json!("NONE")];

        let mut ssh_host = field(&["tunnel", "<<0>>", "ssh_host"], Some(json!("bastion")));
        ssh_host.depends_on_idx = Some(0);
        ssh_host.depends_on_value = vec![json!("SSH")];

        let mut unrelated = field(&["tunnel", "<<1>>", "proxy_url"], Some(json!("x")));
        unrelated.depends_on_idx = Some(0);
        unrelated.depends_on_value = vec![json!("NONE")];

        let form = Form {
            form_type: FORM_TYPE_SPEC.to_string(),
            spec: vec![method, ssh_host, unrelated],
            ..Default::default()
        };

        assert_eq!(
            form.to_spec(),
            json!({"tunnel": {"tunnel_method": "SSH", "ssh_host": "bastion"}})
        );
    }

    #[test]
    fn test_to_configured_catalog_selected_streams_only() {
        let form = Form {
            form_type: FORM_TYPE_CATALOG.to_string(),
            catalog: vec![
                FormFieldCatalog {
                    stream: Stream {
                        name: "users".to_string(),
                        ..Default::default()
                    },
                    stream_name: "users".to_string(),
                    is_stream_selected: true,
                    selected_sync_mode: vec![
                        SYNC_MODE_INCREMENTAL.to_string(),
                        DESTINATION_SYNC_MODE_APPEND_DEDUP.to_string(),
                    ],
                    selected_cursor_field: vec!["updated_at".to_string()],
                    selected_primary_key: vec![vec!["id".to_string()]],
                    ..Default::default()
                },
                FormFieldCatalog {
                    stream_name: "skipped".to_string(),
                    is_stream_selected: false,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let doc = form.to_configured_catalog();
        let streams = doc["configuredCatalog"]["streams"].as_array().unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0]["sync_mode"], json!("incremental"));
        assert_eq!(streams[0]["cursor_field"], json!(["updated_at"]));
        assert_eq!(streams[0]["destination_sync_mode"], json!("append_dedup"));
        assert_eq!(streams[0]["primary_key"], json!([["id"]]));

        // The document is itself a valid protocol message.
        let encoded = serde_json::to_vec(&doc).unwrap();
        let msg = Message::parse(&encoded).unwrap();
        assert_eq!(msg.configured_catalog.unwrap().streams.len(), 1);
    }

    #[test]
    fn test_one_of_segment_detection() {
        assert!(is_one_of_segment("<<0>>"));
        assert!(is_one_of_segment("<<17>>"));
        assert!(!is_one_of_segment("<<>>"));
        assert!(!is_one_of_segment("<<x>>"));
        assert!(!is_one_of_segment("credentials"));
    }
}
