// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device-side provider: reconciles desired components through the
//! deployment engine and answers status queries.

use crate::component::ComponentSpec;
use crate::heartbeat::{HeartbeatReporter, StatusSink};
use crate::provider::{ComparisonPack, TargetProvider};
use crate::summary::{ComponentState, SummarySpec, TargetResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use sv_core::{parse_release_payload, DeviceConfig, OutcomeStatus};
use sv_engine::DeploymentEngine;

/// Last-known payload and verdict for a component, kept so later
/// `remove`/`get` requests without payloads still resolve.
#[derive(Debug, Clone)]
struct RegistryEntry {
    payload: Value,
    status: OutcomeStatus,
    state: ComponentState,
}

/// [`TargetProvider`] implementation over a shared [`DeploymentEngine`].
pub struct DeviceProvider {
    config: DeviceConfig,
    engine: Arc<DeploymentEngine>,
    registry: Mutex<HashMap<String, RegistryEntry>>,
    heartbeat: tokio::sync::Mutex<Option<HeartbeatReporter>>,
    status_sink: Option<Arc<dyn StatusSink>>,
}

impl DeviceProvider {
    pub fn new(config: DeviceConfig, engine: Arc<DeploymentEngine>) -> Self {
        Self {
            config,
            engine,
            registry: Mutex::new(HashMap::new()),
            heartbeat: tokio::sync::Mutex::new(None),
            status_sink: None,
        }
    }

    /// Attach a sink for heartbeat documents (e.g. the transport).
    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = Some(sink);
        self
    }

    pub fn engine(&self) -> &Arc<DeploymentEngine> {
        &self.engine
    }

    /// Last recorded verdict per registered component (diagnostics).
    pub fn component_states(&self) -> HashMap<String, (ComponentState, OutcomeStatus)> {
        self.registry
            .lock()
            .iter()
            .map(|(name, entry)| (name.clone(), (entry.state, entry.status)))
            .collect()
    }

    fn target_name<'a>(&'a self, metadata: &'a HashMap<String, String>) -> &'a str {
        metadata
            .get("active-target")
            .map(String::as_str)
            .unwrap_or(&self.config.device_id)
    }

    /// Decode a component's payload, optionally falling back to the
    /// registry when the request carries no data.
    fn resolve_payload(
        &self,
        component: &ComponentSpec,
        allow_registry_lookup: bool,
    ) -> Result<Value, String> {
        match component.stack_payload()? {
            Some(payload) => Ok(payload),
            None => {
                if allow_registry_lookup {
                    if let Some(entry) = self.registry.lock().get(component.display_name()) {
                        return Ok(entry.payload.clone());
                    }
                }
                Err("Component stack payload not available".to_string())
            }
        }
    }
}

#[async_trait]
impl TargetProvider for DeviceProvider {
    async fn init(&self) {
        tracing::info!(device_id = %self.config.device_id, "device provider initialized");
        if self.config.heartbeat.enabled {
            let reporter = HeartbeatReporter::spawn(
                self.config.device_id.clone(),
                Arc::clone(&self.engine),
                self.status_sink.clone(),
                Duration::from_secs_f64(self.config.heartbeat.interval_seconds),
            );
            *self.heartbeat.lock().await = Some(reporter);
        } else {
            tracing::info!("heartbeat disabled by configuration");
        }
    }

    async fn apply(
        &self,
        metadata: &HashMap<String, String>,
        components: &[ComponentSpec],
    ) -> String {
        let mut result = SummarySpec::new(1);
        let mut target_result = TargetResult::default();
        let mut successes = 0;
        let mut failures = 0;
        let target_name = self.target_name(metadata).to_string();

        for component in components {
            let component_name = component.display_name().to_string();

            let payload = match self.resolve_payload(component, false) {
                Ok(payload) => payload,
                Err(message) => {
                    failures += 1;
                    target_result.record(&component_name, ComponentState::UpdateFailed, message);
                    continue;
                }
            };
            let release = match parse_release_payload(&payload) {
                Ok(release) => release,
                Err(e) => {
                    failures += 1;
                    target_result.record(
                        &component_name,
                        ComponentState::UpdateFailed,
                        e.to_string(),
                    );
                    continue;
                }
            };
            if let Err(e) = self.engine.ensure_stack_ready(&release.name) {
                failures += 1;
                target_result.record(&component_name, ComponentState::UpdateFailed, e.to_string());
                continue;
            }

            let outcome = self.engine.apply_release(&release).await;
            let state = if outcome.is_applied() {
                successes += 1;
                ComponentState::Updated
            } else {
                failures += 1;
                ComponentState::UpdateFailed
            };
            target_result.record(&component_name, state, outcome.message.clone());
            self.registry.lock().insert(
                component_name,
                RegistryEntry {
                    payload,
                    status: outcome.status,
                    state,
                },
            );
        }

        target_result.status = if failures == 0 { "OK" } else { "FAILED" }.to_string();
        if failures > 0 {
            let message = format!("{failures} component(s) failed during apply");
            target_result.message = Some(message.clone());
            result.summary_message = Some(message);
        }
        result.success_count = successes;
        result.current_deployed = successes;
        result.planned_deployment = components.len();
        result.update_target_result(&target_name, target_result);
        result.to_json()
    }

    async fn remove(
        &self,
        metadata: &HashMap<String, String>,
        components: &[ComponentSpec],
    ) -> String {
        let mut result = SummarySpec::new(1);
        let mut target_result = TargetResult::default();
        let mut successes = 0;
        let mut failures = 0;
        let target_name = self.target_name(metadata).to_string();

        for component in components {
            let component_name = component.display_name().to_string();

            let payload = match self.resolve_payload(component, true) {
                Ok(payload) => payload,
                Err(message) => {
                    failures += 1;
                    target_result.record(&component_name, ComponentState::DeleteFailed, message);
                    continue;
                }
            };
            let release = match parse_release_payload(&payload) {
                Ok(release) => release,
                Err(e) => {
                    failures += 1;
                    target_result.record(
                        &component_name,
                        ComponentState::DeleteFailed,
                        e.to_string(),
                    );
                    continue;
                }
            };

            let outcome = self.engine.remove_release(&release).await;
            if outcome.is_removed() {
                successes += 1;
                target_result.record(&component_name, ComponentState::Deleted, outcome.message);
                self.registry.lock().remove(&component_name);
            } else {
                failures += 1;
                target_result.record(&component_name, ComponentState::DeleteFailed, outcome.message);
            }
        }

        target_result.status = if failures == 0 { "OK" } else { "FAILED" }.to_string();
        if failures > 0 {
            let message = format!("{failures} component(s) failed during removal");
            target_result.message = Some(message.clone());
            result.summary_message = Some(message);
        }
        result.success_count = successes;
        result.removed = successes > 0;
        result.update_target_result(&target_name, target_result);
        result.to_json()
    }

    async fn get(
        &self,
        metadata: &HashMap<String, String>,
        components: &[ComponentSpec],
    ) -> Value {
        let target_name = self.target_name(metadata).to_string();
        let mut reported = Vec::new();

        let candidates: Vec<(String, Value)> = if components.is_empty() {
            self.registry
                .lock()
                .iter()
                .map(|(name, entry)| (name.clone(), entry.payload.clone()))
                .collect()
        } else {
            components
                .iter()
                .filter_map(|component| {
                    self.resolve_payload(component, true)
                        .ok()
                        .map(|payload| (component.display_name().to_string(), payload))
                })
                .collect()
        };

        for (component_name, payload) in candidates {
            let Ok(release) = parse_release_payload(&payload) else {
                continue;
            };
            let status = self.engine.get_status(&release.name);
            reported.push(json!({
                "component": component_name,
                "target": target_name,
                "release": release.version,
                "status": status,
            }));
        }
        Value::Array(reported)
    }

    fn needs_update(&self, pack: &ComparisonPack) -> bool {
        let current_by_name: HashMap<&str, &ComponentSpec> = pack
            .current
            .iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| (c.name.as_str(), c))
            .collect();

        for desired in &pack.desired {
            if desired.name.is_empty() {
                continue;
            }
            let Some(current) = current_by_name.get(desired.name.as_str()) else {
                return true;
            };
            let desired_payload = desired.stack_payload().ok().flatten();
            let current_payload = current.stack_payload().ok().flatten();
            let (Some(desired_payload), Some(current_payload)) =
                (desired_payload, current_payload)
            else {
                return true;
            };
            let (Ok(desired_release), Ok(current_release)) = (
                parse_release_payload(&desired_payload),
                parse_release_payload(&current_payload),
            ) else {
                return true;
            };
            if desired_release.version != current_release.version {
                return true;
            }
        }
        false
    }

    fn needs_remove(&self, pack: &ComparisonPack) -> bool {
        let desired_names: HashSet<&str> = pack
            .desired
            .iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| c.name.as_str())
            .collect();
        pack.current
            .iter()
            .any(|c| !c.name.is_empty() && !desired_names.contains(c.name.as_str()))
    }

    async fn cleanup(&self) {
        if let Some(reporter) = self.heartbeat.lock().await.take() {
            reporter.stop().await;
        }
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
