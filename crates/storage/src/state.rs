// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-stack state document.
//!
//! Field names are load-bearing: devices upgrading from older agents must
//! read and write the same JSON shape, so every rename here is a wire
//! change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use sv_core::{ArtifactSpec, Release, RuntimeSpec};

/// Deployment state machine position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    #[default]
    Idle,
    Installing,
    Activating,
    Starting,
    Running,
    Rollback,
    Failed,
}

sv_core::simple_display! {
    DeployState {
        Idle => "idle",
        Installing => "installing",
        Activating => "activating",
        Starting => "starting",
        Running => "running",
        Rollback => "rollback",
        Failed => "failed",
    }
}

/// Lifecycle timestamps, RFC 3339 UTC
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back: Option<String>,
}

/// Where the deployment state machine stands for this stack
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentStatus {
    pub state: DeployState,
    pub target_version: Option<String>,
    pub last_failure: Option<String>,
    pub last_failure_at: Option<String>,
    pub timestamps: Timestamps,
}

/// Supervised child process, if any
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessInfo {
    pub pid: Option<i32>,
    pub started_at: Option<String>,
}

/// Runtime section of a persisted release record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeRecord {
    pub start_command: String,
    pub stop_command: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: Option<String>,
}

/// Fully-serialized release, enough to reconstruct a [`Release`] without
/// the control plane (used for rollback and restart-on-boot).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseRecord {
    pub name: String,
    pub version: String,
    pub artifact_uri: String,
    pub checksum: String,
    pub runtime: RuntimeRecord,
}

impl From<&Release> for ReleaseRecord {
    fn from(release: &Release) -> Self {
        Self {
            name: release.name.clone(),
            version: release.version.clone(),
            artifact_uri: release.artifact.uri.clone(),
            checksum: release.artifact.checksum.clone(),
            runtime: RuntimeRecord {
                start_command: release.runtime.start_command.clone(),
                stop_command: release.runtime.stop_command.clone(),
                environment: release.runtime.environment.clone(),
                working_directory: release.runtime.working_directory.clone(),
            },
        }
    }
}

impl ReleaseRecord {
    /// Rebuild the domain release this record was serialized from.
    pub fn to_release(&self) -> Release {
        Release {
            name: self.name.clone(),
            version: self.version.clone(),
            artifact: ArtifactSpec {
                uri: self.artifact_uri.clone(),
                checksum: self.checksum.clone(),
            },
            runtime: RuntimeSpec {
                start_command: self.runtime.start_command.clone(),
                stop_command: self.runtime.stop_command.clone(),
                environment: self.runtime.environment.clone(),
                working_directory: self.runtime.working_directory.clone(),
            },
        }
    }
}

/// The complete per-stack document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackState {
    /// Version currently activated, or none
    pub current: Option<String>,
    /// Prior active version retained for rollback
    pub previous: Option<String>,
    pub deployment: DeploymentStatus,
    pub process: ProcessInfo,
    /// Version → serialized release record
    pub releases: BTreeMap<String, ReleaseRecord>,
}

impl StackState {
    /// Reconstruct the release recorded for `version`, if present.
    pub fn release(&self, version: &str) -> Option<Release> {
        self.releases.get(version).map(ReleaseRecord::to_release)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
