// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for deployment scenarios.

use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use sv_core::{DeviceConfig, DownloadConfig, ExecutorConfig, Release};
use sv_engine::CommandExecutor;

/// Agent configuration pointed at a throwaway root, with windows short
/// enough for tests.
pub fn test_config(root: &Path) -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.device_id = "edge-7".to_string();
    config.storage.root_dir = root.to_path_buf();
    config.downloads = DownloadConfig {
        retries: 1,
        timeout_seconds: 5,
        backoff_seconds: 0.1,
    };
    config.executor = ExecutorConfig {
        start_grace_seconds: 1,
        stop_timeout_seconds: 2,
    };
    config.heartbeat.enabled = false;
    config
}

/// Build a tar.gz fixture and return its `file://` uri and sha256.
pub fn make_archive(dir: &Path, file_name: &str) -> (String, String) {
    let archive_path = dir.join(file_name);
    let file = std::fs::File::create(&archive_path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(2);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "payload.txt", &b"ok"[..]).unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    let checksum = hex::encode(Sha256::digest(std::fs::read(&archive_path).unwrap()));
    (format!("file://{}", archive_path.display()), checksum)
}

/// Release for `stack-a` pointing at the fixture archive.
pub fn release(uri: &str, checksum: &str, version: &str, start_command: &str) -> Release {
    Release::builder()
        .name("stack-a")
        .version(version)
        .uri(uri)
        .checksum(checksum)
        .start_command(start_command)
        .build()
}

/// SIGKILL a recorded pid and reap it so liveness probes see it vanish.
pub fn kill_and_reap(pid: i32) {
    let target = nix::unistd::Pid::from_raw(pid);
    let _ = nix::sys::signal::killpg(target, nix::sys::signal::Signal::SIGKILL);
    let _ = nix::sys::wait::waitpid(target, None);
}

/// Poll until the pid is gone (bounded).
pub async fn wait_until_gone(pid: i32) {
    for _ in 0..50 {
        if !CommandExecutor::pid_alive(pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("pid {pid} still alive");
}
