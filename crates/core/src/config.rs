// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration consumed by the deployment engine.
//!
//! The core never reads files or environment variables itself; the
//! (external) loader hands over an already-built [`DeviceConfig`].

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors, fatal at boot
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("storage root_dir must not be empty")]
    EmptyRootDir,
    #[error("download retries must be at least 1")]
    ZeroRetries,
    #[error("heartbeat interval_seconds must be positive")]
    NonPositiveHeartbeat,
}

/// Local storage layout
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the on-disk tree (`<root>/stacks/...`, `<root>/incoming/`)
    pub root_dir: PathBuf,
    /// Release directories retained per stack beyond current/previous
    pub keep_releases: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/var/lib/stevedore"),
            keep_releases: 2,
        }
    }
}

/// Artifact download policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Total attempts, including the first
    pub retries: u32,
    /// Per-attempt timeout
    pub timeout_seconds: u64,
    /// Base backoff; attempt `i` sleeps `backoff · 2^i`
    pub backoff_seconds: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout_seconds: 60,
            backoff_seconds: 2.0,
        }
    }
}

/// Child process lifecycle windows
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Window during which an exit counts as a start failure
    pub start_grace_seconds: u64,
    /// Bound applied to each stop escalation step
    pub stop_timeout_seconds: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            start_grace_seconds: 10,
            stop_timeout_seconds: 10,
        }
    }
}

/// Periodic status reporting
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_seconds: f64,
    pub enabled: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30.0,
            enabled: true,
        }
    }
}

/// Complete device agent configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Logical device identifier the control plane addresses
    pub device_id: String,
    pub storage: StorageConfig,
    pub downloads: DownloadConfig,
    pub executor: ExecutorConfig,
    pub heartbeat: HeartbeatConfig,
    /// Agent log directory, consumed by the embedding process's logging
    /// setup; release process logs always live under `<stack>/logs`
    pub log_dir: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: "stevedore-device-001".to_string(),
            storage: StorageConfig::default(),
            downloads: DownloadConfig::default(),
            executor: ExecutorConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            log_dir: None,
        }
    }
}

impl DeviceConfig {
    /// Validate invariants the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.root_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRootDir);
        }
        if self.downloads.retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.heartbeat.interval_seconds <= 0.0 {
            return Err(ConfigError::NonPositiveHeartbeat);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
