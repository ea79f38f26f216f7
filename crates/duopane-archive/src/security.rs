//! Path, name, size, and integrity checks applied around every tool run.

use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Access, ArchiveError, ErrorCode, Result};

/// Default extracted-to-archive size ratio above which an archive is treated
/// as a compression bomb.
pub const DEFAULT_MAX_COMPRESSION_RATIO: f64 = 1000.0;

const HASH_CHUNK: usize = 64 * 1024;

/// Reject entry paths that are absolute or climb out of their root.
pub fn validate_path(path: &str) -> Result<()> {
    let unified = path.replace('\\', "/");
    if is_absolute(&unified) {
        return Err(ArchiveError::path_traversal(path, "absolute path"));
    }
    let cleaned = lexical_clean(Path::new(&unified));
    if escapes(&cleaned) {
        return Err(ArchiveError::path_traversal(path, "escapes the destination"));
    }
    Ok(())
}

/// Validate the target of a link entry named `link`.
///
/// Symlink targets resolve against the link's own directory. Hardlink targets
/// name another entry of the same archive.
pub fn validate_link_target(link: &str, target: &str, hard: bool) -> Result<()> {
    if hard {
        return validate_path(target).map_err(|_| {
            ArchiveError::path_traversal(link, &format!("hardlink target '{target}' is unsafe"))
        });
    }

    let unified = target.replace('\\', "/");
    if is_absolute(&unified) {
        return Err(ArchiveError::path_traversal(
            link,
            &format!("symlink target '{target}' is absolute"),
        ));
    }
    let link = link.replace('\\', "/");
    let parent = Path::new(&link).parent().unwrap_or(Path::new(""));
    if escapes(&lexical_clean(&parent.join(&unified))) {
        return Err(ArchiveError::path_traversal(
            link,
            &format!("symlink target '{target}' escapes the destination"),
        ));
    }
    Ok(())
}

/// Reject empty names and names carrying control characters other than tab.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ArchiveError::invalid_name(name, "empty name"));
    }
    if name.chars().any(|c| c.is_control() && c != '\t') {
        return Err(ArchiveError::invalid_name(
            name.escape_debug(),
            "contains control characters",
        ));
    }
    Ok(())
}

/// Prefix paths that would be read as options by the tool.
pub fn sanitize_path_for_command(path: &Path) -> PathBuf {
    if path.as_os_str().to_string_lossy().starts_with('-') {
        Path::new(".").join(path)
    } else {
        path.to_path_buf()
    }
}

/// Hex SHA-256 of a whole file.
pub async fn calculate_file_hash(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|err| ArchiveError::from_io(err, path, Access::Read))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|err| ArchiveError::from_io(err, path, Access::Read))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Fail with an internal error when the file no longer hashes to `expected`.
pub async fn verify_file_hash(path: &Path, expected: &str) -> Result<()> {
    let actual = calculate_file_hash(path).await?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ArchiveError::internal(format!(
            "'{}' changed after it was inspected",
            path.display()
        ))
        .with_detail(format!("expected sha256 {expected}, found {actual}")))
    }
}

/// True when `extracted / archive` exceeds the default ratio.
pub fn check_compression_ratio(archive_size: u64, extracted_size: u64) -> bool {
    exceeds_compression_ratio(archive_size, extracted_size, DEFAULT_MAX_COMPRESSION_RATIO)
}

pub fn exceeds_compression_ratio(archive_size: u64, extracted_size: u64, max_ratio: f64) -> bool {
    archive_size > 0 && extracted_size as f64 / archive_size as f64 > max_ratio
}

#[derive(Debug, thiserror::Error)]
pub enum DiskSpaceError {
    #[error("cannot query free space: {0}")]
    Query(#[source] io::Error),
    #[error("{required} bytes required, {available} available")]
    Insufficient { required: u64, available: u64 },
}

/// Free bytes on the filesystem holding `path`, or its nearest existing ancestor.
pub fn available_disk_space(path: &Path) -> io::Result<u64> {
    let probe = path
        .ancestors()
        .find(|candidate| candidate.exists())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no existing ancestor"))?;
    fs2::available_space(probe)
}

pub fn check_disk_space(path: &Path, required: u64) -> std::result::Result<(), DiskSpaceError> {
    let available = available_disk_space(path).map_err(DiskSpaceError::Query)?;
    if required > available {
        return Err(DiskSpaceError::Insufficient {
            required,
            available,
        });
    }
    Ok(())
}

/// Walk an extracted tree and delete every symlink whose target is absolute
/// or resolves outside `root`. Fails after the walk if any were found.
pub fn validate_extracted_symlinks(root: &Path) -> Result<()> {
    validate_symlinks_under(root, &[PathBuf::new()])
}

/// Like [`validate_extracted_symlinks`], but only walks `paths` (relative to
/// `root`). Targets are still resolved against `root`.
pub fn validate_symlinks_under(root: &Path, paths: &[PathBuf]) -> Result<()> {
    let root = root
        .canonicalize()
        .map_err(|err| ArchiveError::from_io(err, root, Access::Read))?;
    let mut rejected = Vec::new();

    for start in paths {
        let start = root.join(start);
        if start.symlink_metadata().is_err() {
            continue;
        }
        for entry in WalkDir::new(&start).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.path_is_symlink() {
                continue;
            }
            let link = entry.path();
            let target = match std::fs::read_link(link) {
                Ok(target) => target,
                Err(err) => {
                    debug!(path = %link.display(), error = %err, "cannot read symlink");
                    continue;
                }
            };

            let relative = link.strip_prefix(&root).unwrap_or(link);
            let parent = relative.parent().unwrap_or(Path::new(""));
            let unsafe_link = target.has_root()
                || target.is_absolute()
                || escapes(&lexical_clean(&parent.join(&target)));
            if !unsafe_link {
                continue;
            }

            warn!(
                link = %link.display(),
                target = %target.display(),
                "removing symlink that points outside the destination"
            );
            if let Err(err) = std::fs::remove_file(link) {
                return Err(ArchiveError::from_io(err, link, Access::Write));
            }
            rejected.push(relative.display().to_string());
        }
    }

    match rejected.first() {
        None => Ok(()),
        Some(first) => Err(ArchiveError::path_traversal(
            first,
            "symlink points outside the destination",
        )
        .with_detail(format!(
            "removed {} unsafe symlink(s): {}",
            rejected.len(),
            rejected.join(", ")
        ))),
    }
}

/// Rooted paths, plus drive and UNC prefixes where the host has them. A colon
/// is an ordinary name character on Unix.
fn is_absolute(path: &str) -> bool {
    let path = Path::new(path);
    path.has_root() || matches!(path.components().next(), Some(Component::Prefix(_)))
}

/// Resolve `.` and `..` without touching the filesystem. Leading `..` that
/// cannot be resolved are kept.
fn lexical_clean(path: &Path) -> Vec<&OsStr> {
    let mut parts: Vec<&OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(last) if *last != ".." => {
                    parts.pop();
                }
                _ => parts.push(OsStr::new("..")),
            },
            Component::Normal(part) => parts.push(part),
            Component::RootDir | Component::Prefix(_) => parts.push(OsStr::new("/")),
        }
    }
    parts
}

fn escapes(cleaned: &[&OsStr]) -> bool {
    cleaned
        .iter()
        .any(|part| *part == OsStr::new("..") || *part == OsStr::new("/"))
}

impl ArchiveError {
    pub(crate) fn from_disk_space(err: DiskSpaceError, path: &Path) -> Self {
        let (code, message) = match err {
            DiskSpaceError::Insufficient { .. } => (
                ErrorCode::DiskSpaceInsufficient,
                format!("not enough free space in '{}'", path.display()),
            ),
            DiskSpaceError::Query(_) => (
                ErrorCode::IoError,
                format!("cannot determine free space in '{}'", path.display()),
            ),
        };
        let detail = err.to_string();
        ArchiveError::new(code, message)
            .with_detail(detail)
            .with_cause(err)
    }
}
