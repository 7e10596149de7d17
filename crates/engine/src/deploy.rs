// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployment orchestration for atomic installs and rollback.
//!
//! All mutating operations on one stack run under that stack's lock; the
//! engine converts every internal error into a [`DeploymentOutcome`], so
//! errors never cross this boundary.

use crate::artifact::{self, ArtifactError};
use crate::executor::{CommandExecutor, ExecError, ProcessHandle};
use crate::paths::{self, StackPaths};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use sv_core::{Clock, DeploymentOutcome, DeviceConfig, OutcomeStatus, Release, SystemClock};
use sv_storage::{DeployState, ReleaseRecord, StackState, StateError, StateStore};
use thiserror::Error;

/// Poll cadence inside the start grace window
const GRACE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Engine-internal failure; always converted to an outcome at the boundary
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("Release directory {0} not found")]
    MissingReleaseDir(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pure projection of the persisted state document for one stack
#[derive(Debug, Clone, Serialize)]
pub struct StackStatus {
    pub current: Option<String>,
    pub previous: Option<String>,
    pub deployment_state: DeployState,
    pub last_failure: Option<String>,
    pub last_failure_at: Option<String>,
    pub installed_at: Option<String>,
    pub activated_at: Option<String>,
    pub rolled_back_at: Option<String>,
}

/// Per-stack deployment lifecycle engine.
///
/// Cheap to share behind an [`Arc`]; all state lives on disk plus a map of
/// per-stack locks created on first touch.
pub struct DeploymentEngine<C: Clock = SystemClock> {
    config: DeviceConfig,
    executor: CommandExecutor,
    client: reqwest::Client,
    clock: C,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeploymentEngine<SystemClock> {
    pub fn new(config: DeviceConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> DeploymentEngine<C> {
    pub fn with_clock(config: DeviceConfig, clock: C) -> Self {
        Self {
            config,
            executor: CommandExecutor,
            client: reqwest::Client::new(),
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn stack_lock(&self, stack_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(stack_name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    pub fn stack_paths(&self, stack_name: &str) -> StackPaths {
        StackPaths::new(&self.config.storage.root_dir, stack_name)
    }

    fn state_store(&self, stack_paths: &StackPaths) -> StateStore<C> {
        StateStore::with_clock(stack_paths.state_file.clone(), self.clock.clone())
    }

    /// Create the stack's directory layout and sweep interrupted installs.
    pub fn ensure_stack_ready(&self, stack_name: &str) -> std::io::Result<()> {
        self.stack_paths(stack_name).ensure_ready()
    }

    /// Remove stray `*.tmp` release directories for one stack.
    pub fn cleanup_incomplete_installations(&self, stack_name: &str) {
        self.stack_paths(stack_name).sweep_tmp_dirs();
    }

    /// Install, activate, and start a release, rolling back on a failed
    /// start when a previous version is recoverable.
    pub async fn apply_release(&self, release: &Release) -> DeploymentOutcome {
        let lock = self.stack_lock(&release.name);
        let _guard = lock.lock().await;
        match self.apply_release_locked(release).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(stack = %release.name, version = %release.version, error = %e, "apply failed");
                DeploymentOutcome::new(OutcomeStatus::Failed, e.to_string(), &release.version)
            }
        }
    }

    async fn apply_release_locked(
        &self,
        release: &Release,
    ) -> Result<DeploymentOutcome, DeployError> {
        let stack_paths = self.stack_paths(&release.name);
        stack_paths.ensure_ready()?;
        let store = self.state_store(&stack_paths);
        let state = store.load();
        store.record_release(ReleaseRecord::from(release))?;

        let current = state.current.clone();
        let pid_alive = state
            .process
            .pid
            .map(CommandExecutor::pid_alive)
            .unwrap_or(false);
        if current.as_deref() == Some(release.version.as_str()) && pid_alive {
            return Ok(DeploymentOutcome::new(
                OutcomeStatus::Noop,
                "Release already active",
                &release.version,
            ));
        }

        if !stack_paths.release_dir(&release.version).is_dir() {
            store.update_deployment_state(DeployState::Installing, Some(&release.version), None)?;
            if let Err(e) = self.install_release(release, &stack_paths, &store).await {
                tracing::error!(stack = %release.name, version = %release.version, error = %e, "install failed");
                store.update_deployment_state(
                    DeployState::Failed,
                    Some(&release.version),
                    Some(&e.to_string()),
                )?;
                return Ok(DeploymentOutcome::new(
                    OutcomeStatus::Failed,
                    e.to_string(),
                    &release.version,
                ));
            }
        }

        // Switching versions: remember the outgoing one for rollback and
        // stop its process before the flip.
        let mut previous = state.previous.clone();
        if let Some(active) = current.as_deref().filter(|v| *v != release.version) {
            previous = Some(active.to_string());
            if let Some(outgoing) = state.release(active) {
                self.stop_current_process(&state, &outgoing, &stack_paths, &store)
                    .await;
            }
        }

        store.update_deployment_state(DeployState::Activating, Some(&release.version), None)?;
        if let Err(e) = self.activate_release(&stack_paths, &release.version) {
            store.update_deployment_state(
                DeployState::Failed,
                Some(&release.version),
                Some(&e.to_string()),
            )?;
            return Ok(DeploymentOutcome::new(
                OutcomeStatus::Failed,
                e.to_string(),
                &release.version,
            ));
        }
        store.set_current(Some(&release.version), previous.as_deref())?;

        if let Err(reason) = self.start_release(release, &stack_paths, &store).await? {
            return match previous.as_deref() {
                Some(previous_version) => {
                    self.rollback_to(previous_version, release, &stack_paths, &store, &reason)
                        .await
                }
                None => Ok(DeploymentOutcome::new(
                    OutcomeStatus::Failed,
                    reason,
                    &release.version,
                )),
            };
        }

        store.update_deployment_state(DeployState::Running, Some(&release.version), None)?;
        store.clear_last_failure()?;
        self.prune_releases(&stack_paths);
        Ok(DeploymentOutcome::new(
            OutcomeStatus::Running,
            "Release activated",
            &release.version,
        ))
    }

    /// Stop or delete a release. Removing a non-current release purges its
    /// directory; removing the current one stops the process and unlinks
    /// `current` (leaving `previous` for a later rollback).
    pub async fn remove_release(&self, release: &Release) -> DeploymentOutcome {
        let lock = self.stack_lock(&release.name);
        let _guard = lock.lock().await;
        match self.remove_release_locked(release).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(stack = %release.name, version = %release.version, error = %e, "remove failed");
                DeploymentOutcome::new(OutcomeStatus::Failed, e.to_string(), &release.version)
            }
        }
    }

    async fn remove_release_locked(
        &self,
        release: &Release,
    ) -> Result<DeploymentOutcome, DeployError> {
        let stack_paths = self.stack_paths(&release.name);
        let store = self.state_store(&stack_paths);
        let state = store.load();

        if state.current.as_deref() != Some(release.version.as_str()) {
            let release_dir = stack_paths.release_dir(&release.version);
            if release_dir.is_dir() {
                if let Err(e) = std::fs::remove_dir_all(&release_dir) {
                    tracing::warn!(path = %release_dir.display(), error = %e, "release dir removal incomplete");
                }
                return Ok(DeploymentOutcome::new(
                    OutcomeStatus::Removed,
                    "Release directory removed",
                    &release.version,
                ));
            }
            return Ok(DeploymentOutcome::new(
                OutcomeStatus::Noop,
                "Release not active",
                &release.version,
            ));
        }

        self.stop_current_process(&state, release, &stack_paths, &store)
            .await;
        paths::remove_symlink(&stack_paths.current_link())?;
        store.set_current(None, state.previous.as_deref())?;
        Ok(DeploymentOutcome::new(
            OutcomeStatus::Stopped,
            "Release stopped",
            &release.version,
        ))
    }

    /// Restart the current release when its recorded process is gone.
    /// Used by bootstrap after a device reboot; no install, no activation,
    /// no rollback target.
    pub async fn restart_current_if_needed(&self, stack_name: &str) -> Option<DeploymentOutcome> {
        let lock = self.stack_lock(stack_name);
        let _guard = lock.lock().await;

        let stack_paths = self.stack_paths(stack_name);
        let store = self.state_store(&stack_paths);
        let state = store.load();
        let current = state.current.clone()?;
        if state
            .process
            .pid
            .map(CommandExecutor::pid_alive)
            .unwrap_or(false)
        {
            return None;
        }
        let release = state.release(&current)?;

        tracing::info!(stack = stack_name, version = %current, "restarting current release");
        let outcome = match self.start_release(&release, &stack_paths, &store).await {
            Ok(Ok(())) => {
                if let Err(e) =
                    store.update_deployment_state(DeployState::Running, Some(&current), None)
                {
                    tracing::warn!(stack = stack_name, error = %e, "failed to persist running state");
                }
                DeploymentOutcome::new(OutcomeStatus::Running, "Release started", &current)
            }
            Ok(Err(reason)) => DeploymentOutcome::new(OutcomeStatus::Failed, reason, &current),
            Err(e) => DeploymentOutcome::new(OutcomeStatus::Failed, e.to_string(), &current),
        };
        Some(outcome)
    }

    /// Projection of the persisted state for status reporting.
    pub fn get_status(&self, stack_name: &str) -> StackStatus {
        let stack_paths = self.stack_paths(stack_name);
        let state = self.state_store(&stack_paths).load();
        StackStatus {
            current: state.current,
            previous: state.previous,
            deployment_state: state.deployment.state,
            last_failure: state.deployment.last_failure,
            last_failure_at: state.deployment.last_failure_at,
            installed_at: state.deployment.timestamps.installed,
            activated_at: state.deployment.timestamps.activated,
            rolled_back_at: state.deployment.timestamps.rolled_back,
        }
    }

    /// All stacks known on this device.
    pub fn list_stacks(&self) -> Vec<String> {
        paths::list_stacks(&self.config.storage.root_dir)
    }

    async fn install_release(
        &self,
        release: &Release,
        stack_paths: &StackPaths,
        store: &StateStore<C>,
    ) -> Result<(), DeployError> {
        let incoming = stack_paths.incoming_file(&release.name, &release.version);
        artifact::download_verified(
            &self.client,
            &release.artifact.uri,
            &incoming,
            &release.artifact.checksum,
            &self.config.downloads,
        )
        .await?;
        store.record_install_timestamp(&release.version)?;

        let tmp_dir = stack_paths.release_tmp_dir(&release.version);
        if tmp_dir.exists() {
            std::fs::remove_dir_all(&tmp_dir)?;
        }
        std::fs::create_dir_all(&tmp_dir)?;

        let extracted: Result<(), DeployError> = async {
            artifact::extract_archive(&incoming, &tmp_dir).await?;
            std::fs::rename(&tmp_dir, stack_paths.release_dir(&release.version))?;
            Ok(())
        }
        .await;
        if extracted.is_err() {
            let _ = std::fs::remove_dir_all(&tmp_dir);
        }
        extracted
    }

    /// Flip `current` to the version's release dir, preserving the old
    /// target in `previous`. Both flips are tmp+rename atomic.
    fn activate_release(&self, stack_paths: &StackPaths, version: &str) -> Result<(), DeployError> {
        let release_dir = stack_paths.release_dir(version);
        if !release_dir.is_dir() {
            return Err(DeployError::MissingReleaseDir(release_dir));
        }

        let target = StackPaths::link_target(version);
        let current_target = paths::read_link_target(&stack_paths.current_link());
        if let Some(existing) = current_target.as_deref() {
            if existing != target {
                paths::atomic_symlink(existing, &stack_paths.previous_link())?;
            }
        }
        if current_target.as_deref() == Some(target.as_str()) {
            return Ok(());
        }
        paths::atomic_symlink(&target, &stack_paths.current_link())?;
        Ok(())
    }

    /// Start the release and hold it through the grace window.
    ///
    /// `Ok(Err(reason))` is a start failure the caller may roll back from;
    /// the failure is already persisted with `deployment.state = failed`.
    async fn start_release(
        &self,
        release: &Release,
        stack_paths: &StackPaths,
        store: &StateStore<C>,
    ) -> Result<Result<(), String>, DeployError> {
        store.update_deployment_state(DeployState::Starting, Some(&release.version), None)?;
        let release_dir = stack_paths.release_dir(&release.version);
        let cwd = StackPaths::resolve_cwd(&release_dir, release.runtime.working_directory.as_deref());
        let log_path = stack_paths.log_file(&release.version);

        let mut handle = match self.executor.start(
            &release.runtime.start_command,
            &release.runtime.environment,
            &cwd,
            &log_path,
        ) {
            Ok(handle) => handle,
            Err(e) => {
                let reason = format!("Start failed: {e}");
                store.update_deployment_state(
                    DeployState::Failed,
                    Some(&release.version),
                    Some(&reason),
                )?;
                return Ok(Err(reason));
            }
        };
        store.update_process(Some(handle.pid()), Some(self.clock.timestamp()))?;

        if let Some(reason) = self.wait_for_grace(&mut handle).await {
            store.update_deployment_state(
                DeployState::Failed,
                Some(&release.version),
                Some(&reason),
            )?;
            return Ok(Err(reason));
        }
        Ok(Ok(()))
    }

    /// Poll the child through the grace window. Any exit inside the window
    /// is a start failure, even a clean one: the contract is "stays up".
    async fn wait_for_grace(&self, handle: &mut ProcessHandle) -> Option<String> {
        let deadline =
            self.clock.now() + Duration::from_secs(self.config.executor.start_grace_seconds);
        while self.clock.now() < deadline {
            if let Some(code) = handle.poll() {
                return Some(if code != 0 {
                    format!("Process exited with {code}")
                } else {
                    "Process exited during grace period".to_string()
                });
            }
            tokio::time::sleep(GRACE_POLL_INTERVAL).await;
        }
        None
    }

    /// Reactivate and restart `previous_version` after a failed start.
    async fn rollback_to(
        &self,
        previous_version: &str,
        failed_release: &Release,
        stack_paths: &StackPaths,
        store: &StateStore<C>,
        reason: &str,
    ) -> Result<DeploymentOutcome, DeployError> {
        tracing::error!(
            stack = %failed_release.name,
            failed_version = %failed_release.version,
            rollback_version = previous_version,
            %reason,
            "deployment failed, rolling back"
        );

        let Some(rollback_release) = store.load().release(previous_version) else {
            store.update_deployment_state(
                DeployState::Failed,
                Some(&failed_release.version),
                Some(reason),
            )?;
            return Ok(DeploymentOutcome::new(
                OutcomeStatus::Failed,
                reason,
                &failed_release.version,
            ));
        };

        store.update_deployment_state(DeployState::Rollback, Some(previous_version), Some(reason))?;
        self.activate_release(stack_paths, previous_version)?;
        store.set_current(Some(previous_version), Some(&failed_release.version))?;
        store.record_rollback_timestamp(Some(previous_version))?;

        match self
            .start_release(&rollback_release, stack_paths, store)
            .await?
        {
            Ok(()) => {
                store.update_deployment_state(DeployState::Running, Some(previous_version), None)?;
                Ok(DeploymentOutcome::new(
                    OutcomeStatus::RolledBack,
                    format!("Rollback succeeded: {reason}"),
                    previous_version,
                ))
            }
            Err(_) => Ok(DeploymentOutcome::new(
                OutcomeStatus::Failed,
                format!("Rollback failed: {reason}"),
                previous_version,
            )),
        }
    }

    /// Stop the recorded process for the active release: stop_command
    /// (best-effort), SIGTERM, SIGKILL. Always clears the process fields.
    async fn stop_current_process(
        &self,
        state: &StackState,
        release: &Release,
        stack_paths: &StackPaths,
        store: &StateStore<C>,
    ) {
        let Some(pid) = state.process.pid else {
            return;
        };
        let release_dir = stack_paths.release_dir(&release.version);
        let cwd = StackPaths::resolve_cwd(&release_dir, release.runtime.working_directory.as_deref());
        let timeout = Duration::from_secs(self.config.executor.stop_timeout_seconds);

        let mut handle = ProcessHandle::from_pid(pid);
        if let Err(e) = self
            .executor
            .stop(
                &mut handle,
                release.runtime.stop_command.as_deref(),
                &release.runtime.environment,
                &cwd,
                timeout,
            )
            .await
        {
            tracing::warn!(stack = %release.name, pid, error = %e, "stop escalation did not confirm exit");
        }
        if let Err(e) = store.update_process(None, None) {
            tracing::warn!(stack = %release.name, error = %e, "failed to clear process record");
        }
    }

    /// Honor `storage.keep_releases`: drop release directories beyond the
    /// newest N, never touching current/previous. Best-effort.
    fn prune_releases(&self, stack_paths: &StackPaths) {
        let keep = self.config.storage.keep_releases;
        let protected: Vec<String> = [
            paths::read_link_target(&stack_paths.current_link()),
            paths::read_link_target(&stack_paths.previous_link()),
        ]
        .into_iter()
        .flatten()
        .collect();

        let entries = match std::fs::read_dir(&stack_paths.releases_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let mut candidates: Vec<(PathBuf, SystemTime)> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                !name.ends_with(".tmp")
                    && !protected.contains(&StackPaths::link_target(&name))
            })
            .filter_map(|e| {
                let mtime = e.metadata().ok()?.modified().ok()?;
                Some((e.path(), mtime))
            })
            .collect();
        if candidates.len() <= keep {
            return;
        }
        candidates.sort_by_key(|(_, mtime)| *mtime);
        let excess = candidates.len() - keep;
        for (path, _) in candidates.into_iter().take(excess) {
            tracing::info!(path = %path.display(), "pruning old release directory");
            if let Err(e) = std::fs::remove_dir_all(&path) {
                tracing::warn!(path = %path.display(), error = %e, "prune failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "deploy_tests.rs"]
mod tests;
