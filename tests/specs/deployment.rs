// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployment engine scenarios: happy path, idempotence, rollback,
//! hostile archives, checksum retries.

use crate::prelude::*;
use serial_test::serial;
use sha2::{Digest, Sha256};
use sv_core::OutcomeStatus;
use sv_engine::{paths, CommandExecutor, DeploymentEngine};
use sv_storage::{DeployState, StateStore};
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn happy_path_installs_and_supervises() {
    let root = TempDir::new().unwrap();
    let (uri, checksum) = make_archive(root.path(), "release.tar.gz");
    let engine = DeploymentEngine::new(test_config(root.path()));
    let v1 = release(&uri, &checksum, "1.0.0", "sleep 60");

    let outcome = engine.apply_release(&v1).await;
    assert_eq!(outcome.status, OutcomeStatus::Running, "{}", outcome.message);

    let stack_paths = engine.stack_paths("stack-a");
    assert_eq!(
        paths::read_link_target(&stack_paths.current_link()).as_deref(),
        Some("releases/1.0.0")
    );
    assert!(stack_paths.release_dir("1.0.0").join("payload.txt").exists());
    assert!(stack_paths.log_file("1.0.0").exists());

    let state = StateStore::new(&stack_paths.state_file).load();
    assert_eq!(state.deployment.state, DeployState::Running);
    let pid = state.process.pid.unwrap();
    assert!(CommandExecutor::pid_alive(pid));

    engine.remove_release(&v1).await;
    wait_until_gone(pid).await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn immediate_reapply_is_idempotent() {
    let root = TempDir::new().unwrap();
    let (uri, checksum) = make_archive(root.path(), "release.tar.gz");
    let engine = DeploymentEngine::new(test_config(root.path()));
    let v1 = release(&uri, &checksum, "1.0.0", "sleep 60");

    assert_eq!(engine.apply_release(&v1).await.status, OutcomeStatus::Running);
    let stack_paths = engine.stack_paths("stack-a");
    let store = StateStore::new(&stack_paths.state_file);
    let pid = store.load().process.pid;
    let log_len = std::fs::metadata(stack_paths.log_file("1.0.0")).unwrap().len();

    let outcome = engine.apply_release(&v1).await;
    assert_eq!(outcome.status, OutcomeStatus::Noop);
    assert_eq!(outcome.message, "Release already active");
    assert_eq!(store.load().process.pid, pid);
    // No restart means no fresh log writes
    assert_eq!(
        std::fs::metadata(stack_paths.log_file("1.0.0")).unwrap().len(),
        log_len
    );

    engine.remove_release(&v1).await;
    wait_until_gone(pid.unwrap()).await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn bad_start_rolls_back_to_previous_version() {
    let root = TempDir::new().unwrap();
    let (uri, checksum) = make_archive(root.path(), "release.tar.gz");
    let engine = DeploymentEngine::new(test_config(root.path()));

    let v1 = release(&uri, &checksum, "1.0.0", "sleep 60");
    assert_eq!(engine.apply_release(&v1).await.status, OutcomeStatus::Running);

    let v2 = release(&uri, &checksum, "1.0.1", "false");
    let outcome = engine.apply_release(&v2).await;
    assert_eq!(outcome.status, OutcomeStatus::RolledBack, "{}", outcome.message);

    let stack_paths = engine.stack_paths("stack-a");
    assert_eq!(
        paths::read_link_target(&stack_paths.current_link()).as_deref(),
        Some("releases/1.0.0")
    );
    let status = engine.get_status("stack-a");
    assert_eq!(status.current.as_deref(), Some("1.0.0"));
    assert_eq!(status.deployment_state, DeployState::Running);
    assert!(status.rolled_back_at.is_some());
    assert!(status.last_failure.unwrap().contains("exited with 1"));

    let pid = StateStore::new(&stack_paths.state_file).load().process.pid.unwrap();
    engine.remove_release(&v1).await;
    wait_until_gone(pid).await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn archive_escaping_destination_is_rejected() {
    let root = TempDir::new().unwrap();

    let archive_path = root.path().join("evil.tar.gz");
    let file = std::fs::File::create(&archive_path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    let name = b"../escape.txt";
    {
        let gnu = header.as_gnu_mut().unwrap();
        gnu.name[..name.len()].copy_from_slice(name);
    }
    header.set_size(3);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, &b"bad"[..]).unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    let checksum = hex::encode(Sha256::digest(std::fs::read(&archive_path).unwrap()));
    let uri = format!("file://{}", archive_path.display());
    let engine = DeploymentEngine::new(test_config(root.path()));

    let outcome = engine.apply_release(&release(&uri, &checksum, "1.0.0", "sleep 60")).await;
    assert_eq!(outcome.status, OutcomeStatus::Failed);

    let stack_paths = engine.stack_paths("stack-a");
    assert!(!stack_paths.release_dir("1.0.0").exists());
    assert!(!stack_paths.release_tmp_dir("1.0.0").exists());
    assert!(!stack_paths.stack_dir.join("escape.txt").exists());
    assert!(!root.path().join("escape.txt").exists());
    assert_eq!(engine.get_status("stack-a").deployment_state, DeployState::Failed);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn checksum_mismatch_retries_then_fails_clean() {
    let root = TempDir::new().unwrap();
    let (uri, _) = make_archive(root.path(), "release.tar.gz");
    let mut config = test_config(root.path());
    config.downloads.retries = 2;
    config.downloads.backoff_seconds = 0.01;
    let engine = DeploymentEngine::new(config);

    let declared = hex::encode(Sha256::digest(b"something else entirely"));
    let outcome = engine.apply_release(&release(&uri, &declared, "1.0.0", "sleep 60")).await;
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert!(outcome.message.contains("Checksum mismatch"), "{}", outcome.message);

    let stack_paths = engine.stack_paths("stack-a");
    let incoming = stack_paths.incoming_file("stack-a", "1.0.0");
    assert!(!incoming.exists());
    assert!(!incoming.with_extension("artifact.part").exists());
    assert!(!stack_paths.release_dir("1.0.0").exists());
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn restart_on_boot_records_new_pid() {
    let root = TempDir::new().unwrap();
    let (uri, checksum) = make_archive(root.path(), "release.tar.gz");
    let engine = DeploymentEngine::new(test_config(root.path()));
    let v1 = release(&uri, &checksum, "1.0.0", "sleep 60");

    assert_eq!(engine.apply_release(&v1).await.status, OutcomeStatus::Running);
    let stack_paths = engine.stack_paths("stack-a");
    let old_pid = StateStore::new(&stack_paths.state_file).load().process.pid.unwrap();

    kill_and_reap(old_pid);
    wait_until_gone(old_pid).await;

    let outcome = engine.restart_current_if_needed("stack-a").await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Running, "{}", outcome.message);

    let state = StateStore::new(&stack_paths.state_file).load();
    assert_eq!(state.current.as_deref(), Some("1.0.0"));
    assert_eq!(state.deployment.state, DeployState::Running);
    let new_pid = state.process.pid.unwrap();
    assert_ne!(new_pid, old_pid);
    assert!(CommandExecutor::pid_alive(new_pid));

    engine.remove_release(&v1).await;
    wait_until_gone(new_pid).await;
}
