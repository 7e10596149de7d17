// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport-facing provider interface.
//!
//! The transport decodes request envelopes and calls the matching verb;
//! responses are strings (mutating verbs), JSON arrays (`get`), or
//! booleans (`needs_*`). The adapter owns everything in between.

use crate::component::ComponentSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Verbs a desired-state request can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestVerb {
    Apply,
    Remove,
    Get,
    NeedsUpdate,
    NeedsRemove,
}

sv_core::simple_display! {
    RequestVerb {
        Apply => "apply",
        Remove => "remove",
        Get => "get",
        NeedsUpdate => "needs_update",
        NeedsRemove => "needs_remove",
    }
}

/// Decoded desired-state request envelope
#[derive(Debug, Clone, Deserialize)]
pub struct DesiredStateRequest {
    pub verb: RequestVerb,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    /// Present only for comparison verbs
    #[serde(default)]
    pub current: Vec<ComponentSpec>,
}

/// Desired vs. currently-deployed component lists for `needs_*` verbs
#[derive(Debug, Clone, Default)]
pub struct ComparisonPack {
    pub desired: Vec<ComponentSpec>,
    pub current: Vec<ComponentSpec>,
}

/// Plugin interface the transport drives.
#[async_trait]
pub trait TargetProvider: Send + Sync {
    /// One-time startup hook (heartbeat registration etc.).
    async fn init(&self);

    /// Reconcile desired components onto the device; returns the summary
    /// document as JSON.
    async fn apply(&self, metadata: &HashMap<String, String>, components: &[ComponentSpec])
        -> String;

    /// Stop/remove components; returns the summary document as JSON.
    async fn remove(
        &self,
        metadata: &HashMap<String, String>,
        components: &[ComponentSpec],
    ) -> String;

    /// Report per-component status; returns a JSON array.
    async fn get(&self, metadata: &HashMap<String, String>, components: &[ComponentSpec]) -> Value;

    /// True when any desired component is missing or out of date.
    fn needs_update(&self, pack: &ComparisonPack) -> bool;

    /// True when any current component is no longer desired.
    fn needs_remove(&self, pack: &ComparisonPack) -> bool;

    /// Release resources on shutdown.
    async fn cleanup(&self);

    /// Route a decoded envelope to the matching verb and render the
    /// response string the transport ships back.
    async fn dispatch(&self, request: &DesiredStateRequest) -> String {
        match request.verb {
            RequestVerb::Apply => self.apply(&request.metadata, &request.components).await,
            RequestVerb::Remove => self.remove(&request.metadata, &request.components).await,
            RequestVerb::Get => self
                .get(&request.metadata, &request.components)
                .await
                .to_string(),
            RequestVerb::NeedsUpdate => {
                let pack = ComparisonPack {
                    desired: request.components.clone(),
                    current: request.current.clone(),
                };
                self.needs_update(&pack).to_string()
            }
            RequestVerb::NeedsRemove => {
                let pack = ComparisonPack {
                    desired: request.components.clone(),
                    current: request.current.clone(),
                };
                self.needs_remove(&pack).to_string()
            }
        }
    }
}
