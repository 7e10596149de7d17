// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-stack directory layout and atomic symlink flips.
//!
//! Symlink targets are relative (`releases/<version>`) so a whole stack
//! tree can be relocated without rewriting links.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Deterministic paths for one stack under the storage root
#[derive(Debug, Clone)]
pub struct StackPaths {
    pub stack_dir: PathBuf,
    pub releases_dir: PathBuf,
    pub incoming_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub state_file: PathBuf,
}

impl StackPaths {
    pub fn new(root_dir: &Path, stack_name: &str) -> Self {
        let stack_dir = root_dir.join("stacks").join(stack_name);
        Self {
            releases_dir: stack_dir.join("releases"),
            incoming_dir: root_dir.join("incoming"),
            logs_dir: stack_dir.join("logs"),
            state_file: stack_dir.join("state.json"),
            stack_dir,
        }
    }

    pub fn release_dir(&self, version: &str) -> PathBuf {
        self.releases_dir.join(version)
    }

    /// In-progress extraction directory, renamed into place on success.
    pub fn release_tmp_dir(&self, version: &str) -> PathBuf {
        self.releases_dir.join(format!("{version}.tmp"))
    }

    pub fn incoming_file(&self, stack_name: &str, version: &str) -> PathBuf {
        self.incoming_dir.join(format!("{stack_name}-{version}.artifact"))
    }

    pub fn log_file(&self, version: &str) -> PathBuf {
        self.logs_dir.join(format!("{version}.log"))
    }

    pub fn current_link(&self) -> PathBuf {
        self.stack_dir.join("current")
    }

    pub fn previous_link(&self) -> PathBuf {
        self.stack_dir.join("previous")
    }

    /// Relative symlink target for a version.
    pub fn link_target(version: &str) -> String {
        format!("releases/{version}")
    }

    /// Create the per-stack directories (idempotent) and sweep stray
    /// `*.tmp` release directories left by interrupted installs.
    pub fn ensure_ready(&self) -> io::Result<()> {
        fs::create_dir_all(&self.releases_dir)?;
        fs::create_dir_all(&self.incoming_dir)?;
        fs::create_dir_all(&self.logs_dir)?;
        self.sweep_tmp_dirs();
        Ok(())
    }

    /// Best-effort removal of `*.tmp` release directories.
    pub fn sweep_tmp_dirs(&self) {
        let entries = match fs::read_dir(&self.releases_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().ends_with(".tmp") {
                let path = entry.path();
                if let Err(e) = fs::remove_dir_all(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to sweep tmp release dir");
                }
            }
        }
    }

    /// Resolve a release's working directory: absolute wins, relative is
    /// joined onto the release dir, unset means the release dir itself.
    pub fn resolve_cwd(release_dir: &Path, working_directory: Option<&str>) -> PathBuf {
        match working_directory {
            None => release_dir.to_path_buf(),
            Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => release_dir.join(dir),
        }
    }
}

/// Crash-atomic symlink flip: create `link.tmp`, rename over `link`.
pub fn atomic_symlink(target: &str, link_path: &Path) -> io::Result<()> {
    let temp_link = PathBuf::from(format!("{}.tmp", link_path.display()));
    match fs::symlink_metadata(&temp_link) {
        Ok(_) => fs::remove_file(&temp_link)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::os::unix::fs::symlink(target, &temp_link)?;
    fs::rename(&temp_link, link_path)?;
    Ok(())
}

/// Target of `link_path` if it is a symlink.
pub fn read_link_target(link_path: &Path) -> Option<String> {
    let metadata = fs::symlink_metadata(link_path).ok()?;
    if !metadata.file_type().is_symlink() {
        return None;
    }
    fs::read_link(link_path)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

/// Remove `link_path` only when it is a symlink.
pub fn remove_symlink(link_path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(link_path) {
        Ok(metadata) if metadata.file_type().is_symlink() => fs::remove_file(link_path),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Stack names present under `<root>/stacks/`.
pub fn list_stacks(root_dir: &Path) -> Vec<String> {
    let stacks_root = root_dir.join("stacks");
    let entries = match fs::read_dir(&stacks_root) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
