use std::ops::Range;
use std::path::{Path, PathBuf};

use duopane_platform::Command;

use crate::entry::{ArchiveEntry, EntryKind};
use crate::executor::is_separator;

/// Drives `7z` (p7zip or 7-Zip).
#[derive(Clone, Debug, Default)]
pub struct SevenZipExecutor;

impl SevenZipExecutor {
    pub fn new() -> Self {
        Self
    }

    /// `-bb1` prints one line per file, `-bsp0` silences the percentage meter.
    pub(crate) fn compress_command(
        &self,
        temp: &Path,
        base: &Path,
        sources: &[PathBuf],
        level: u32,
    ) -> Command {
        Command::new("7z")
            .arg("a")
            .arg(format!("-mx={level}"))
            .args(["-bb1", "-bsp0"])
            .arg(temp)
            .arg("--")
            .args(sources)
            .current_dir(base)
    }

    pub(crate) fn extract_command(&self, archive: &Path, dest: &Path) -> Command {
        let mut out_switch = std::ffi::OsString::from("-o");
        out_switch.push(dest);
        Command::new("7z")
            .arg("x")
            .arg(out_switch)
            .args(["-y", "-bb1", "-bsp0"])
            .arg(archive)
    }

    pub(crate) fn list_command(&self, archive: &Path) -> Command {
        Command::new("7z").arg("l").arg(archive)
    }
}

pub(crate) fn parse_compress_line(line: &str) -> Option<&str> {
    strip_marker(line, "+ ", "Compressing")
}

pub(crate) fn parse_extract_line(line: &str) -> Option<&str> {
    strip_marker(line, "- ", "Extracting")
}

fn strip_marker<'a>(line: &'a str, short: &str, long: &str) -> Option<&'a str> {
    let name = line
        .strip_prefix(short)
        .or_else(|| line.trim_start().strip_prefix(long))?
        .trim();
    (!name.is_empty()).then_some(name)
}

/// Parse `7z l`. Column spans come from the dashed line under the header, so
/// rows with a blank "Compressed" cell (solid blocks) still line up.
pub(crate) fn parse_listing(output: &str) -> Vec<ArchiveEntry> {
    let mut lines = output.lines().skip_while(|line| !is_separator(line));
    let Some(separator) = lines.next() else {
        return Vec::new();
    };
    let columns = column_spans(separator);
    if columns.len() < 4 {
        return Vec::new();
    }
    let attr = columns[1].clone();
    let size = columns[2].clone();
    let name_start = columns[columns.len() - 1].start;

    lines
        .take_while(|line| !is_separator(line))
        .filter_map(|line| {
            let name = line.get(name_start..)?.trim_end();
            if name.is_empty() {
                return None;
            }
            let size = cell(line, &size).parse().unwrap_or(0);
            let entry = if cell(line, &attr).starts_with('D') {
                ArchiveEntry {
                    path: name.to_string(),
                    size: 0,
                    kind: EntryKind::Directory,
                }
            } else {
                ArchiveEntry::file(name, size)
            };
            Some(entry)
        })
        .collect()
}

fn cell<'a>(line: &'a str, span: &Range<usize>) -> &'a str {
    let end = span.end.min(line.len());
    line.get(span.start.min(end)..end).unwrap_or("").trim()
}

fn column_spans(separator: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in separator.char_indices() {
        match (c, start) {
            ('-', None) => start = Some(i),
            ('-', Some(_)) => {}
            (_, Some(s)) => {
                spans.push(s..i);
                start = None;
            }
            (_, None) => {}
        }
    }
    if let Some(s) = start {
        spans.push(s..separator.len());
    }
    spans
}
