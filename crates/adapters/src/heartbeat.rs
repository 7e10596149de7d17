// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic device status reporting.
//!
//! One background task per agent collects stack statuses and pushes them
//! through an optional [`StatusSink`] (transport publish, control-plane
//! status update). Tick failures are contained; the loop only ends on
//! cancellation.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sv_engine::{DeploymentEngine, StackStatus};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Bound on the cooperative shutdown join
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
#[error("status sink error: {0}")]
pub struct SinkError(pub String);

/// Snapshot shipped on every heartbeat tick
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub online: bool,
    pub stacks: BTreeMap<String, StackStatus>,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

/// Consumer of heartbeat documents (typically a transport publish).
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, status: &DeviceStatus) -> Result<(), SinkError>;
}

/// Handle to the background heartbeat worker.
pub struct HeartbeatReporter {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl HeartbeatReporter {
    /// Spawn the worker. It ticks immediately, then every `interval`.
    pub fn spawn(
        device_id: String,
        engine: Arc<DeploymentEngine>,
        sink: Option<Arc<dyn StatusSink>>,
        interval: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let worker_token = token.clone();
        tracing::info!(interval_secs = interval.as_secs_f64(), "heartbeat started");

        let handle = tokio::spawn(async move {
            loop {
                tick(&device_id, &engine, sink.as_deref()).await;
                tokio::select! {
                    _ = worker_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::info!("heartbeat stopped");
        });

        Self { token, handle }
    }

    /// Cooperative shutdown with a bounded join.
    pub async fn stop(self) {
        self.token.cancel();
        if tokio::time::timeout(STOP_GRACE, self.handle).await.is_err() {
            tracing::warn!("heartbeat worker did not stop within {STOP_GRACE:?}");
        }
    }
}

/// Collect the device status document for one tick.
pub fn collect_status(device_id: &str, engine: &DeploymentEngine) -> DeviceStatus {
    let mut stacks = BTreeMap::new();
    for stack_name in engine.list_stacks() {
        stacks.insert(stack_name.clone(), engine.get_status(&stack_name));
    }
    DeviceStatus {
        device_id: device_id.to_string(),
        online: true,
        stacks,
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64(),
    }
}

/// One tick: collect and publish. Every failure is logged and swallowed
/// so the loop never dies.
async fn tick(device_id: &str, engine: &DeploymentEngine, sink: Option<&dyn StatusSink>) {
    let status = collect_status(device_id, engine);
    if let Some(sink) = sink {
        if let Err(e) = sink.publish(&status).await {
            tracing::warn!(error = %e, "heartbeat publish failed");
        }
    } else {
        tracing::debug!(stacks = status.stacks.len(), "heartbeat tick (no sink)");
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
