// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent bootstrap scenarios: recovery across agent restarts.

use crate::prelude::*;
use serial_test::serial;
use sv_core::OutcomeStatus;
use sv_engine::{CommandExecutor, DeploymentEngine};
use sv_storage::StateStore;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn init_restores_supervision_after_reboot() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let (uri, checksum) = make_archive(root.path(), "release.tar.gz");
    let v1 = release(&uri, &checksum, "1.0.0", "sleep 60");

    // First life: deploy, then lose the process (simulated reboot)
    {
        let engine = DeploymentEngine::new(config.clone());
        let outcome = engine.apply_release(&v1).await;
        assert_eq!(outcome.status, OutcomeStatus::Running, "{}", outcome.message);
        let stack_paths = engine.stack_paths("stack-a");
        let pid = StateStore::new(&stack_paths.state_file).load().process.pid.unwrap();
        kill_and_reap(pid);
        wait_until_gone(pid).await;

        // Interrupted install left a stray tmp dir behind
        std::fs::create_dir_all(stack_paths.release_tmp_dir("2.0.0")).unwrap();
    }

    // Second life: init sweeps and restarts without control-plane input
    let agent = sv_daemon::init(config).await.unwrap();
    let stack_paths = agent.engine().stack_paths("stack-a");
    assert!(!stack_paths.release_tmp_dir("2.0.0").exists());

    let state = StateStore::new(&stack_paths.state_file).load();
    let pid = state.process.pid.unwrap();
    assert!(CommandExecutor::pid_alive(pid));
    assert_eq!(state.current.as_deref(), Some("1.0.0"));

    agent.engine().remove_release(&v1).await;
    wait_until_gone(pid).await;
    agent.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn init_leaves_running_stacks_alone() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let (uri, checksum) = make_archive(root.path(), "release.tar.gz");
    let v1 = release(&uri, &checksum, "1.0.0", "sleep 60");

    let engine = DeploymentEngine::new(config.clone());
    assert_eq!(engine.apply_release(&v1).await.status, OutcomeStatus::Running);
    let stack_paths = engine.stack_paths("stack-a");
    let pid_before = StateStore::new(&stack_paths.state_file).load().process.pid;

    let agent = sv_daemon::init(config).await.unwrap();
    let pid_after = StateStore::new(&stack_paths.state_file).load().process.pid;
    assert_eq!(pid_before, pid_after);

    agent.engine().remove_release(&v1).await;
    wait_until_gone(pid_before.unwrap()).await;
    agent.shutdown().await;
}
