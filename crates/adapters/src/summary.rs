// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Summary document returned for mutating desired-state requests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-component verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    Updated,
    UpdateFailed,
    Deleted,
    DeleteFailed,
}

sv_core::simple_display! {
    ComponentState {
        Updated => "UPDATED",
        UpdateFailed => "UPDATE_FAILED",
        Deleted => "DELETED",
        DeleteFailed => "DELETE_FAILED",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentResult {
    pub status: ComponentState,
    #[serde(default)]
    pub message: String,
}

/// Result for one addressed target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResult {
    /// `OK` iff every component succeeded
    pub status: String,
    /// Always `DONE` once the request has been processed
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub component_results: BTreeMap<String, ComponentResult>,
}

impl Default for TargetResult {
    fn default() -> Self {
        Self {
            status: "OK".to_string(),
            state: "DONE".to_string(),
            message: None,
            component_results: BTreeMap::new(),
        }
    }
}

impl TargetResult {
    pub fn record(&mut self, component: &str, status: ComponentState, message: impl Into<String>) {
        self.component_results.insert(
            component.to_string(),
            ComponentResult {
                status,
                message: message.into(),
            },
        );
    }
}

/// Top-level summary for a mutating request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarySpec {
    pub target_count: usize,
    pub success_count: usize,
    pub planned_deployment: usize,
    pub current_deployed: usize,
    #[serde(default)]
    pub removed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_message: Option<String>,
    pub target_results: BTreeMap<String, TargetResult>,
}

impl SummarySpec {
    pub fn new(target_count: usize) -> Self {
        Self {
            target_count,
            ..Self::default()
        }
    }

    pub fn update_target_result(&mut self, target_name: &str, result: TargetResult) {
        self.target_results.insert(target_name.to_string(), result);
    }

    /// Response string handed back to the transport.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "summary serialization failed");
            "{}".to_string()
        })
    }
}

#[cfg(test)]
#[path = "summary_tests.rs"]
mod tests;
