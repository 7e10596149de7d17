// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Desired-state components and their payload decoding.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One component of a desired-state request.
///
/// `properties.data` carries the stack payload in one of several
/// encodings: a JSON object (preferred), a base64-encoded JSON string, or
/// a raw JSON string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        let mut properties = Map::new();
        properties.insert("data".to_string(), data);
        Self {
            name: name.into(),
            properties,
        }
    }

    /// Display name, never empty.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "unnamed-component"
        } else {
            &self.name
        }
    }

    /// Decode `properties.data` into a JSON payload.
    ///
    /// Returns `Ok(None)` when no data field is present (the caller may
    /// fall back to its registry), and `Err` with a per-component message
    /// when data is present but undecodable.
    pub fn stack_payload(&self) -> Result<Option<Value>, String> {
        let Some(data) = self.properties.get("data") else {
            return Ok(None);
        };
        match data {
            Value::Object(_) => Ok(Some(data.clone())),
            Value::String(text) => decode_string_payload(text).map(Some),
            _ => Err("Unsupported payload format".to_string()),
        }
    }
}

/// Probe order: base64-encoded JSON first, then the raw string as JSON.
fn decode_string_payload(text: &str) -> Result<Value, String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(text)
        .unwrap_or_else(|_| text.as_bytes().to_vec());
    let decoded = String::from_utf8(bytes)
        .map_err(|e| format!("Failed to parse stack data: {e}"))?;
    serde_json::from_str(&decoded).map_err(|e| format!("Failed to parse stack data: {e}"))
}

#[cfg(test)]
#[path = "component_tests.rs"]
mod tests;
