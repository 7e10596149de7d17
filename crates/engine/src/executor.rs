// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process lifecycle for supervised releases.
//!
//! Children are spawned through the shell in their own process group so
//! the stop escalation (stop_command, SIGTERM, SIGKILL) reaches the whole
//! subtree, not just the shell wrapper. There is no shared handle table
//! across requests: the recorded pid in the state document is enough to
//! rebuild a proxy handle after a restart.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};

/// Poll cadence while waiting for a signaled process to exit
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn command: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to open process log {path}: {source}")]
    LogOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("process {pid} still alive after SIGKILL escalation")]
    StopTimeout { pid: i32 },
}

/// A supervised child, either freshly spawned or reconstructed from a
/// recorded pid.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: i32,
    child: Option<Child>,
}

impl ProcessHandle {
    /// Proxy handle for a process this agent did not spawn (e.g. after a
    /// restart). Liveness is probed with signal 0.
    pub fn from_pid(pid: i32) -> Self {
        Self { pid, child: None }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Non-blocking exit probe. `None` while running; signaled exits
    /// report -1, proxy exits report 0.
    pub fn poll(&mut self) -> Option<i32> {
        match &mut self.child {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
                Ok(None) => None,
                Err(e) => {
                    tracing::debug!(pid = self.pid, error = %e, "try_wait failed");
                    None
                }
            },
            None => {
                if CommandExecutor::pid_alive(self.pid) {
                    None
                } else {
                    Some(0)
                }
            }
        }
    }

    /// Wait up to `timeout` for exit, polling. Returns true once exited.
    pub async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.poll().is_some() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }

    /// Graceful terminate: SIGTERM to the process group.
    pub fn terminate(&self) {
        signal_group(self.pid, Signal::SIGTERM);
    }

    /// Forceful kill: SIGKILL to the process group.
    pub fn kill(&self) {
        signal_group(self.pid, Signal::SIGKILL);
    }
}

/// Signal the child's process group, falling back to the single pid when
/// the group is already gone (or never existed for proxy pids).
fn signal_group(pid: i32, sig: Signal) {
    if pid <= 0 {
        return;
    }
    let group = Pid::from_raw(pid);
    match signal::killpg(group, sig) {
        Ok(()) => {}
        Err(Errno::ESRCH) => {}
        Err(_) => {
            let _ = signal::kill(Pid::from_raw(pid), sig);
        }
    }
}

/// Spawns and stops release processes.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    /// Start `command` through the shell with the release environment
    /// merged over the inherited one, stdin closed, and stdout+stderr
    /// appended to `log_path`.
    pub fn start(
        &self,
        command: &str,
        env: &BTreeMap<String, String>,
        cwd: &Path,
        log_path: &Path,
    ) -> Result<ProcessHandle, ExecError> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ExecError::LogOpen {
                path: log_path.to_path_buf(),
                source,
            })?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|source| ExecError::LogOpen {
                path: log_path.to_path_buf(),
                source,
            })?;
        let log_err = log.try_clone().map_err(|source| ExecError::LogOpen {
            path: log_path.to_path_buf(),
            source,
        })?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0);
        let child = cmd.spawn().map_err(ExecError::Spawn)?;
        let pid = child
            .id()
            .map(|id| id as i32)
            .ok_or_else(|| ExecError::Spawn(io::Error::other("child reaped before pid was read")))?;

        tracing::info!(pid, %command, cwd = %cwd.display(), "started release process");
        Ok(ProcessHandle {
            pid,
            child: Some(child),
        })
    }

    /// Stop escalation: best-effort stop_command, then SIGTERM, then
    /// SIGKILL, each step bounded by `timeout`.
    pub async fn stop(
        &self,
        handle: &mut ProcessHandle,
        stop_command: Option<&str>,
        env: &BTreeMap<String, String>,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<(), ExecError> {
        if let Some(command) = stop_command {
            self.run_stop_command(command, env, cwd, timeout).await;
        }

        if handle.poll().is_none() {
            handle.terminate();
            if !handle.wait_for_exit(timeout).await {
                tracing::warn!(pid = handle.pid(), "SIGTERM ignored, escalating to SIGKILL");
                handle.kill();
                if !handle.wait_for_exit(timeout).await {
                    return Err(ExecError::StopTimeout { pid: handle.pid() });
                }
            }
        }
        Ok(())
    }

    /// Run the release's stop_command, ignoring its exit code. Spawn or
    /// timeout failures are logged and swallowed.
    async fn run_stop_command(
        &self,
        command: &str,
        env: &BTreeMap<String, String>,
        cwd: &Path,
        timeout: Duration,
    ) {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let status = tokio::time::timeout(timeout, cmd.status()).await;
        match status {
            Ok(Ok(status)) => {
                tracing::debug!(%command, code = status.code(), "stop_command finished");
            }
            Ok(Err(e)) => {
                tracing::warn!(%command, error = %e, "stop_command failed to run");
            }
            Err(_) => {
                tracing::warn!(%command, ?timeout, "stop_command timed out");
            }
        }
    }

    /// Liveness probe via signal 0; EPERM counts as alive.
    pub fn pid_alive(pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        match signal::kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
