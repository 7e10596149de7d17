// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Release metadata parsing and validation.
//!
//! Desired-state payloads arrive in several historical shapes; fields are
//! looked up top-level first, then under `features.stack.properties` or
//! `stack`, then under generic `metadata`/`attributes` keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Payload rejected before it reaches the engine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReleaseSpecError {
    #[error("Release metadata missing name")]
    MissingName,
    #[error("Release metadata missing version")]
    MissingVersion,
    #[error("Release metadata missing artifact uri")]
    MissingArtifactUri,
    #[error("Release metadata missing checksum")]
    MissingChecksum,
    #[error("Release metadata missing start_command")]
    MissingStartCommand,
}

/// Downloadable artifact reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub uri: String,
    /// sha256 digest, optionally prefixed `sha256:`
    pub checksum: String,
}

/// How a release is run on the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// Shell string handed to `sh -c`
    pub start_command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_command: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Absolute, or relative to the release directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

/// A specific version of a stack, immutable once parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub version: String,
    pub artifact: ArtifactSpec,
    pub runtime: RuntimeSpec,
}

/// Parse a heterogeneous desired-state payload into a validated [`Release`].
pub fn parse_release_payload(payload: &Value) -> Result<Release, ReleaseSpecError> {
    let stack_props = extract_stack_properties(payload);

    let name = first_str(&[
        payload.get("name"),
        stack_props.and_then(|p| p.get("name")),
        nested(payload, &["metadata", "name"]),
        payload.get("thingId"),
    ])
    .ok_or(ReleaseSpecError::MissingName)?;

    let version = first_str(&[
        payload.get("version"),
        stack_props.and_then(|p| p.get("version")),
        nested(payload, &["metadata", "version"]),
        nested(payload, &["attributes", "version"]),
    ])
    .ok_or(ReleaseSpecError::MissingVersion)?;

    let artifact_section = first_object(&[
        payload.get("artifact"),
        stack_props.and_then(|p| p.get("artifact")),
    ]);
    let uri = first_str(&[
        payload.get("artifact_uri"),
        artifact_section.and_then(|s| s.get("uri")),
    ])
    .ok_or(ReleaseSpecError::MissingArtifactUri)?;
    let checksum = first_str(&[
        payload.get("checksum"),
        artifact_section.and_then(|s| s.get("checksum")),
    ])
    .ok_or(ReleaseSpecError::MissingChecksum)?;

    let runtime_section = first_object(&[
        payload.get("runtime"),
        stack_props.and_then(|p| p.get("runtime")),
    ]);
    let start_command = first_str(&[
        payload.get("start_command"),
        runtime_section.and_then(|s| s.get("start_command")),
    ])
    .ok_or(ReleaseSpecError::MissingStartCommand)?;
    let stop_command = first_str(&[
        payload.get("stop_command"),
        runtime_section.and_then(|s| s.get("stop_command")),
    ]);
    let working_directory = first_str(&[
        payload.get("working_directory"),
        runtime_section.and_then(|s| s.get("working_directory")),
    ]);

    let environment = first_object(&[
        payload.get("environment"),
        runtime_section.and_then(|s| s.get("environment")),
    ])
    .map(coerce_string_map)
    .unwrap_or_default();

    Ok(Release {
        name,
        version,
        artifact: ArtifactSpec { uri, checksum },
        runtime: RuntimeSpec {
            start_command,
            stop_command,
            environment,
            working_directory,
        },
    })
}

/// `features.stack.properties` wins over a bare `stack` object.
fn extract_stack_properties(payload: &Value) -> Option<&Map<String, Value>> {
    if let Some(props) = nested(payload, &["features", "stack", "properties"]) {
        if let Some(map) = props.as_object() {
            return Some(map);
        }
    }
    payload.get("stack").and_then(Value::as_object)
}

fn nested<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let mut current = payload;
    for key in keys {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

/// First non-blank string among the candidates.
fn first_str(candidates: &[Option<&Value>]) -> Option<String> {
    candidates
        .iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn first_object<'a>(candidates: &[Option<&'a Value>]) -> Option<&'a Map<String, Value>> {
    candidates.iter().flatten().find_map(|v| v.as_object())
}

/// Coerce env values to strings. Booleans and null keep the literal
/// forms older agents injected (`True`, `False`, `None`); numbers keep
/// their JSON form.
fn coerce_string_map(map: &Map<String, Value>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| {
            let coerced = match v {
                Value::String(s) => s.clone(),
                Value::Bool(true) => "True".to_string(),
                Value::Bool(false) => "False".to_string(),
                Value::Null => "None".to_string(),
                other => other.to_string(),
            };
            (k.clone(), coerced)
        })
        .collect()
}

#[cfg(any(test, feature = "test-support"))]
pub struct ReleaseBuilder {
    name: String,
    version: String,
    uri: String,
    checksum: String,
    start_command: String,
    stop_command: Option<String>,
    environment: BTreeMap<String, String>,
    working_directory: Option<String>,
}

#[cfg(any(test, feature = "test-support"))]
impl Default for ReleaseBuilder {
    fn default() -> Self {
        Self {
            name: "stack-a".to_string(),
            version: "1.0.0".to_string(),
            uri: "file:///tmp/artifact.tar.gz".to_string(),
            checksum: "0".repeat(64),
            start_command: "sleep 60".to_string(),
            stop_command: None,
            environment: BTreeMap::new(),
            working_directory: None,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl ReleaseBuilder {
    pub fn name(mut self, v: impl Into<String>) -> Self {
        self.name = v.into();
        self
    }

    pub fn version(mut self, v: impl Into<String>) -> Self {
        self.version = v.into();
        self
    }

    pub fn uri(mut self, v: impl Into<String>) -> Self {
        self.uri = v.into();
        self
    }

    pub fn checksum(mut self, v: impl Into<String>) -> Self {
        self.checksum = v.into();
        self
    }

    pub fn start_command(mut self, v: impl Into<String>) -> Self {
        self.start_command = v.into();
        self
    }

    pub fn stop_command(mut self, v: impl Into<String>) -> Self {
        self.stop_command = Some(v.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn working_directory(mut self, v: impl Into<String>) -> Self {
        self.working_directory = Some(v.into());
        self
    }

    pub fn build(self) -> Release {
        Release {
            name: self.name,
            version: self.version,
            artifact: ArtifactSpec {
                uri: self.uri,
                checksum: self.checksum,
            },
            runtime: RuntimeSpec {
                start_command: self.start_command,
                stop_command: self.stop_command,
                environment: self.environment,
                working_directory: self.working_directory,
            },
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Release {
    /// Create a builder with test defaults.
    pub fn builder() -> ReleaseBuilder {
        ReleaseBuilder::default()
    }
}

#[cfg(test)]
#[path = "release_tests.rs"]
mod tests;
