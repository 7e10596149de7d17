// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact download and extraction.
//!
//! Downloads stream into a `.part` file while a sha256 accumulator runs,
//! then rename into place; extraction refuses any archive member that
//! would land outside the destination.

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use sv_core::DownloadConfig;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Only sha256 checksums are supported (got {0})")]
    UnsupportedChecksum(String),
    #[error("Failed to download artifact from {uri}: {last_error}")]
    Download { uri: String, last_error: String },
    #[error("Checksum mismatch for {uri}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        uri: String,
        expected: String,
        actual: String,
    },
    #[error("Blocked archive entry outside destination: {0}")]
    UnsafeArchive(String),
    #[error("Extracted release directory is empty")]
    EmptyArchive,
    #[error("Unsupported archive format: {0}")]
    UnsupportedArchive(PathBuf),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Strip an optional `sha256:` prefix; reject any other algorithm.
pub fn parse_sha256(checksum: &str) -> Result<String, ArtifactError> {
    if let Some(hex_digest) = checksum.strip_prefix("sha256:") {
        return Ok(hex_digest.to_ascii_lowercase());
    }
    if checksum.contains(':') {
        return Err(ArtifactError::UnsupportedChecksum(checksum.to_string()));
    }
    Ok(checksum.to_ascii_lowercase())
}

/// Download `uri` to `destination`, verifying the declared sha256.
///
/// Writes to `<destination>.part` and renames on success; a failed attempt
/// unlinks the partial file. Attempts are bounded by `config.retries` with
/// exponential backoff between them.
pub async fn download_verified(
    client: &reqwest::Client,
    uri: &str,
    destination: &Path,
    checksum: &str,
    config: &DownloadConfig,
) -> Result<(), ArtifactError> {
    let expected = parse_sha256(checksum)?;
    let part = PathBuf::from(format!("{}.part", destination.display()));
    let timeout = Duration::from_secs(config.timeout_seconds);

    let mut last_error = String::new();
    for attempt in 0..config.retries {
        let result = download_once(client, uri, &part, &expected, timeout).await;
        match result {
            Ok(()) => {
                tokio::fs::rename(&part, destination).await?;
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(uri, attempt, error = %e, "artifact download attempt failed");
                last_error = e.to_string();
                if tokio::fs::try_exists(&part).await.unwrap_or(false) {
                    let _ = tokio::fs::remove_file(&part).await;
                }
                if attempt + 1 < config.retries {
                    let backoff = config.backoff_seconds * 2f64.powi(attempt as i32);
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                }
            }
        }
    }

    Err(ArtifactError::Download {
        uri: uri.to_string(),
        last_error,
    })
}

/// One attempt: stream to the partial file while hashing, then compare.
async fn download_once(
    client: &reqwest::Client,
    uri: &str,
    part: &Path,
    expected: &str,
    timeout: Duration,
) -> Result<(), ArtifactError> {
    let mut digest = Sha256::new();
    let mut out = tokio::fs::File::create(part).await?;

    match Url::parse(uri) {
        Ok(url) if url.scheme() == "file" => {
            let source = url
                .to_file_path()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("bad file uri: {uri}")))?;
            let mut file = tokio::fs::File::open(source).await?;
            let mut buf = vec![0u8; 8192];
            loop {
                let n = tokio::io::AsyncReadExt::read(&mut file, &mut buf).await?;
                if n == 0 {
                    break;
                }
                digest.update(&buf[..n]);
                out.write_all(&buf[..n]).await?;
            }
        }
        _ => {
            let response = client
                .get(uri)
                .timeout(timeout)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| io::Error::other(e.to_string()))?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let bytes = chunk.map_err(|e| io::Error::other(e.to_string()))?;
                digest.update(&bytes);
                out.write_all(&bytes).await?;
            }
        }
    }
    out.flush().await?;
    drop(out);

    let actual = hex::encode(digest.finalize());
    if actual != expected {
        return Err(ArtifactError::ChecksumMismatch {
            uri: uri.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    TarGz,
    TarBz2,
    TarXz,
    Tar,
    Zip,
}

/// Extract a release archive into `dest`.
///
/// Format is detected from content (gzip/bzip2/xz/plain tar and zip).
/// Every member is validated before anything is written; an offending
/// member fails the whole extraction and leaves `dest` untouched.
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<(), ArtifactError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_archive_blocking(&archive, &dest))
        .await
        .map_err(|e| io::Error::other(e.to_string()))?
}

fn extract_archive_blocking(archive: &Path, dest: &Path) -> Result<(), ArtifactError> {
    match detect_kind(archive)? {
        ArchiveKind::Zip => extract_zip(archive, dest)?,
        kind => extract_tar(kind, archive, dest)?,
    }
    if std::fs::read_dir(dest)?.next().is_none() {
        return Err(ArtifactError::EmptyArchive);
    }
    Ok(())
}

fn detect_kind(archive: &Path) -> Result<ArchiveKind, ArtifactError> {
    let mut header = [0u8; 262];
    let mut file = File::open(archive)?;
    let mut read = 0;
    while read < header.len() {
        let n = file.read(&mut header[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }

    let kind = if header.starts_with(&[0x1f, 0x8b]) {
        ArchiveKind::TarGz
    } else if header.starts_with(b"BZh") {
        ArchiveKind::TarBz2
    } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        ArchiveKind::TarXz
    } else if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
        ArchiveKind::Zip
    } else if read >= 262 && &header[257..262] == b"ustar" {
        ArchiveKind::Tar
    } else {
        return Err(ArtifactError::UnsupportedArchive(archive.to_path_buf()));
    };
    Ok(kind)
}

fn tar_reader(kind: ArchiveKind, archive: &Path) -> Result<Box<dyn Read>, ArtifactError> {
    let file = File::open(archive)?;
    let reader: Box<dyn Read> = match kind {
        ArchiveKind::TarGz => Box::new(flate2::read::GzDecoder::new(file)),
        ArchiveKind::TarBz2 => Box::new(bzip2::read::BzDecoder::new(file)),
        ArchiveKind::TarXz => Box::new(xz2::read::XzDecoder::new(file)),
        ArchiveKind::Tar => Box::new(file),
        ArchiveKind::Zip => return Err(ArtifactError::UnsupportedArchive(archive.to_path_buf())),
    };
    Ok(reader)
}

fn extract_tar(kind: ArchiveKind, archive: &Path, dest: &Path) -> Result<(), ArtifactError> {
    // Validation pass: no member may resolve outside dest, including
    // link targets. Nothing is written until every member checks out.
    let mut validation = tar::Archive::new(tar_reader(kind, archive)?);
    for entry in validation.entries()? {
        let entry = entry?;
        let path = entry.path()?.into_owned();
        validate_member_path(&path)?;
        if let Some(link) = entry.link_name()? {
            if entry.header().entry_type().is_hard_link() {
                // Hardlink targets resolve against the archive root
                validate_member_path(&link)?;
            } else {
                validate_link_target(&path, &link)?;
            }
        }
    }

    let mut extraction = tar::Archive::new(tar_reader(kind, archive)?);
    extraction.unpack(dest)?;
    Ok(())
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), ArtifactError> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    for index in 0..zip.len() {
        let member = zip.by_index(index)?;
        if member.enclosed_name().is_none() {
            return Err(ArtifactError::UnsafeArchive(member.name().to_string()));
        }
    }
    zip.extract(dest)?;
    Ok(())
}

/// Member paths must be relative and free of `..` components.
fn validate_member_path(path: &Path) -> Result<(), ArtifactError> {
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(ArtifactError::UnsafeArchive(path.display().to_string()));
    }
    Ok(())
}

/// Symlink/hardlink targets must stay inside dest once resolved against
/// the member's parent directory.
fn validate_link_target(member: &Path, link: &Path) -> Result<(), ArtifactError> {
    if link.is_absolute() {
        return Err(ArtifactError::UnsafeArchive(format!(
            "{} -> {}",
            member.display(),
            link.display()
        )));
    }
    let mut depth: isize = member.components().count() as isize - 1;
    for component in link.components() {
        match component {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(ArtifactError::UnsafeArchive(format!(
                        "{} -> {}",
                        member.display(),
                        link.display()
                    )));
                }
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(ArtifactError::UnsafeArchive(format!(
                    "{} -> {}",
                    member.display(),
                    link.display()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "artifact_tests.rs"]
mod tests;
