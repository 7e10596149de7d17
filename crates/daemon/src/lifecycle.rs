// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent startup and shutdown.
//!
//! Startup restores supervision without waiting for the control plane:
//! stray `*.tmp` release directories are swept and every stack whose
//! recorded process died (e.g. across a device reboot) is restarted from
//! its persisted release record.

use std::sync::Arc;
use sv_adapters::{DeviceProvider, StatusSink, TargetProvider};
use sv_core::{ConfigError, DeviceConfig};
use sv_engine::DeploymentEngine;

/// A running device agent.
///
/// Holds the shared engine and the provider the transport drives. Dropping
/// it does not stop background work; call [`Agent::shutdown`].
pub struct Agent {
    engine: Arc<DeploymentEngine>,
    provider: Arc<DeviceProvider>,
}

impl Agent {
    pub fn engine(&self) -> &Arc<DeploymentEngine> {
        &self.engine
    }

    /// The provider to wire into the transport layer.
    pub fn provider(&self) -> &Arc<DeviceProvider> {
        &self.provider
    }

    /// Cooperative shutdown: stops the heartbeat worker. Supervised
    /// release processes are left running; the next startup reconnects to
    /// them through their recorded pids.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down device agent");
        self.provider.cleanup().await;
        tracing::info!("device agent shutdown complete");
    }
}

/// Initialize the agent: validate configuration, restore supervision for
/// existing stacks, and start the heartbeat.
///
/// [`ConfigError`] is the only failure that escapes; everything after
/// validation is best-effort recovery.
pub async fn init(config: DeviceConfig) -> Result<Agent, ConfigError> {
    init_with_sink(config, None).await
}

/// [`init`] with a transport-provided sink for heartbeat documents.
pub async fn init_with_sink(
    config: DeviceConfig,
    status_sink: Option<Arc<dyn StatusSink>>,
) -> Result<Agent, ConfigError> {
    config.validate()?;
    tracing::info!(
        device_id = %config.device_id,
        root_dir = %config.storage.root_dir.display(),
        "initializing device agent"
    );

    let engine = Arc::new(DeploymentEngine::new(config.clone()));
    bootstrap_existing_stacks(&engine).await;

    let mut provider = DeviceProvider::new(config, Arc::clone(&engine));
    if let Some(sink) = status_sink {
        provider = provider.with_status_sink(sink);
    }
    let provider = Arc::new(provider);
    provider.init().await;

    Ok(Agent { engine, provider })
}

/// Sweep interrupted installs and restart dead current releases for every
/// stack on disk.
async fn bootstrap_existing_stacks(engine: &DeploymentEngine) {
    for stack_name in engine.list_stacks() {
        engine.cleanup_incomplete_installations(&stack_name);
        match engine.restart_current_if_needed(&stack_name).await {
            Some(outcome) => {
                tracing::info!(
                    stack = %stack_name,
                    status = %outcome.status,
                    message = %outcome.message,
                    "bootstrap restart"
                );
            }
            None => {
                tracing::debug!(stack = %stack_name, "no restart needed");
            }
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
