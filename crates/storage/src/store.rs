// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic persistence for [`StackState`] documents.

use crate::state::{DeployState, ReleaseRecord, StackState};
use std::fs;
use std::path::{Path, PathBuf};
use sv_core::{Clock, SystemClock};
use thiserror::Error;

/// Failure to confirm durability of a state write
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state encode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Load/save gateway for one stack's `state.json`.
///
/// Mutators are small load-modify-save transactions. Callers serialize
/// them per stack; on-disk consistency relies on the tmp+rename alone, so
/// two processes must not drive the same stack concurrently.
pub struct StateStore<C: Clock = SystemClock> {
    path: PathBuf,
    clock: C,
}

impl StateStore<SystemClock> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            clock: SystemClock,
        }
    }
}

impl<C: Clock> StateStore<C> {
    pub fn with_clock(path: impl Into<PathBuf>, clock: C) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state document, falling back to defaults when the file is
    /// missing or unreadable. Serde defaults fill in any keys an older
    /// agent never wrote.
    pub fn load(&self) -> StackState {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StackState::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "state file unreadable, using defaults");
                return StackState::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "state file corrupt, using defaults");
                StackState::default()
            }
        }
    }

    /// Persist via `<path>.tmp` + rename so readers only ever observe a
    /// committed document.
    pub fn save(&self, state: &StackState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Upsert a release record so it stays reconstructible even if a later
    /// phase fails.
    pub fn record_release(&self, record: ReleaseRecord) -> Result<StackState, StateError> {
        let mut state = self.load();
        state.releases.insert(record.version.clone(), record);
        self.save(&state)?;
        Ok(state)
    }

    /// Move the deployment state machine, optionally retargeting and
    /// recording a failure (stamped with the current time).
    pub fn update_deployment_state(
        &self,
        deploy_state: DeployState,
        target_version: Option<&str>,
        last_failure: Option<&str>,
    ) -> Result<StackState, StateError> {
        let mut state = self.load();
        state.deployment.state = deploy_state;
        if let Some(target) = target_version {
            state.deployment.target_version = Some(target.to_string());
        }
        if let Some(failure) = last_failure {
            state.deployment.last_failure = Some(failure.to_string());
            state.deployment.last_failure_at = Some(self.clock.timestamp());
        }
        self.save(&state)?;
        Ok(state)
    }

    /// Record an activation flip; stamps `timestamps.activated`.
    pub fn set_current(
        &self,
        current: Option<&str>,
        previous: Option<&str>,
    ) -> Result<StackState, StateError> {
        let mut state = self.load();
        state.current = current.map(str::to_string);
        state.previous = previous.map(str::to_string);
        state.deployment.timestamps.activated = Some(self.clock.timestamp());
        self.save(&state)?;
        Ok(state)
    }

    pub fn record_install_timestamp(&self, version: &str) -> Result<StackState, StateError> {
        let mut state = self.load();
        state.deployment.timestamps.installed = Some(self.clock.timestamp());
        state.deployment.target_version = Some(version.to_string());
        self.save(&state)?;
        Ok(state)
    }

    pub fn record_rollback_timestamp(
        &self,
        version: Option<&str>,
    ) -> Result<StackState, StateError> {
        let mut state = self.load();
        state.deployment.timestamps.rolled_back = Some(self.clock.timestamp());
        if let Some(version) = version {
            state.deployment.target_version = Some(version.to_string());
        }
        self.save(&state)?;
        Ok(state)
    }

    pub fn update_process(
        &self,
        pid: Option<i32>,
        started_at: Option<String>,
    ) -> Result<StackState, StateError> {
        let mut state = self.load();
        state.process.pid = pid;
        state.process.started_at = started_at;
        self.save(&state)?;
        Ok(state)
    }

    /// Clear the failure fields after a successful run.
    pub fn clear_last_failure(&self) -> Result<StackState, StateError> {
        let mut state = self.load();
        state.deployment.last_failure = None;
        state.deployment.last_failure_at = None;
        self.save(&state)?;
        Ok(state)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
