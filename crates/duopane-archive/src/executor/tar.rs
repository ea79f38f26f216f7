use std::path::{Path, PathBuf};

use duopane_platform::Command;

use crate::entry::{ArchiveEntry, EntryKind};
use crate::executor::split_fields;
use crate::format::ArchiveFormat;

/// Drives `tar` and, through its codec flag, `gzip`, `bzip2` or `xz`.
#[derive(Clone, Debug)]
pub struct TarExecutor {
    format: ArchiveFormat,
}

impl TarExecutor {
    pub fn new(format: ArchiveFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    fn flags(&self, mode: char) -> String {
        format!("-{mode}{}vf", self.format.tar_codec_flag())
    }

    /// tar has no portable level switch per codec; the level is not forwarded.
    pub(crate) fn compress_command(&self, temp: &Path, base: &Path, sources: &[PathBuf]) -> Command {
        Command::new("tar")
            .arg(self.flags('c'))
            .arg(temp)
            .arg("-C")
            .arg(base)
            .arg("--")
            .args(sources)
    }

    pub(crate) fn extract_command(&self, archive: &Path, dest: &Path) -> Command {
        Command::new("tar")
            .arg(self.flags('x'))
            .arg(archive)
            .args(["--no-same-permissions", "--no-same-owner", "-C"])
            .arg(dest)
    }

    pub(crate) fn list_command(&self, archive: &Path) -> Command {
        Command::new("tar").arg(self.flags('t')).arg(archive)
    }
}

/// Verbose tar prints one bare entry name per line.
pub(crate) fn parse_progress_line(line: &str) -> Option<&str> {
    let name = line.trim_end();
    if name.is_empty() || name.starts_with("tar: ") {
        None
    } else {
        Some(name)
    }
}

/// Parse `tar -tv` output from GNU tar or bsdtar.
pub(crate) fn parse_listing(output: &str) -> Vec<ArchiveEntry> {
    output.lines().filter_map(parse_listing_line).collect()
}

fn parse_listing_line(line: &str) -> Option<ArchiveEntry> {
    let mode = line.split_whitespace().next()?;
    let type_char = mode.chars().next()?;
    let owner = line.split_whitespace().nth(1)?;

    // GNU: mode owner/group size date time name
    // bsdtar: mode links owner group size month day time|year name
    let (size, rest) = if owner.contains('/') {
        let (fields, rest) = split_fields(line, 5)?;
        (fields[2], rest)
    } else {
        let (fields, rest) = split_fields(line, 8)?;
        (fields[4], rest)
    };
    let size = size.parse().unwrap_or(0);

    let entry = match type_char {
        'd' => ArchiveEntry {
            path: rest.to_string(),
            size: 0,
            kind: EntryKind::Directory,
        },
        'l' => {
            let (path, target) = rest.split_once(" -> ")?;
            ArchiveEntry {
                path: path.to_string(),
                size: 0,
                kind: EntryKind::Symlink {
                    target: target.to_string(),
                },
            }
        }
        _ => match rest.split_once(" link to ") {
            Some((path, target)) if type_char == 'h' || size == 0 => ArchiveEntry {
                path: path.to_string(),
                size: 0,
                kind: EntryKind::Hardlink {
                    target: target.to_string(),
                },
            },
            _ => ArchiveEntry::file(rest, size),
        },
    };
    Some(entry)
}
