use std::path::{Path, PathBuf};

use duopane_platform::Command;

use crate::entry::{ArchiveEntry, EntryKind};
use crate::executor::{is_separator, split_fields};

/// Drives Info-ZIP `zip` and `unzip`.
#[derive(Clone, Debug, Default)]
pub struct ZipExecutor;

impl ZipExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Runs with `cwd = base`; zip has no separator switch, so sources must
    /// already be sanitized.
    pub(crate) fn compress_command(
        &self,
        temp: &Path,
        base: &Path,
        sources: &[PathBuf],
        level: u32,
    ) -> Command {
        Command::new("zip")
            .arg("-r")
            .arg(format!("-{level}"))
            .arg(temp)
            .args(sources)
            .current_dir(base)
    }

    pub(crate) fn extract_command(&self, archive: &Path, dest: &Path) -> Command {
        Command::new("unzip").arg("-o").arg("-d").arg(dest).arg(archive)
    }

    pub(crate) fn list_command(&self, archive: &Path) -> Command {
        Command::new("unzip").arg("-l").arg(archive)
    }
}

/// `  adding: dir/file.txt (deflated 40%)` gives `dir/file.txt`.
pub(crate) fn parse_compress_line(line: &str) -> Option<&str> {
    let (_, rest) = line.split_once("adding:")?;
    let name = match rest.rfind(" (") {
        Some(end) => &rest[..end],
        None => rest,
    };
    non_empty(name.trim())
}

/// `  inflating: /dest/dir/file.txt` gives `/dest/dir/file.txt`.
pub(crate) fn parse_extract_line(line: &str) -> Option<&str> {
    ["inflating:", "creating:", "extracting:"]
        .iter()
        .find_map(|marker| line.split_once(marker))
        .and_then(|(_, name)| non_empty(name.trim()))
}

fn non_empty(name: &str) -> Option<&str> {
    (!name.is_empty()).then_some(name)
}

/// Parse `unzip -l`: rows between the two dashed separator lines.
pub(crate) fn parse_listing(output: &str) -> Vec<ArchiveEntry> {
    output
        .lines()
        .skip_while(|line| !is_separator(line))
        .skip(1)
        .take_while(|line| !is_separator(line))
        .filter_map(|line| {
            let (fields, name) = split_fields(line, 3)?;
            let size = fields[0].parse().ok()?;
            let entry = if name.ends_with('/') {
                ArchiveEntry {
                    path: name.to_string(),
                    size,
                    kind: EntryKind::Directory,
                }
            } else {
                ArchiveEntry::file(name, size)
            };
            Some(entry)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Archive:  /tmp/photos.zip
  Length      Date    Time    Name
---------  ---------- -----   ----
        0  2024-03-01 10:00   photos/
   204800  2024-03-01 10:00   photos/beach day.jpg
       17  2024-03-01 10:00   photos/notes.txt
---------                     -------
   204817                     3 files
";

    #[test]
    fn command_lines() {
        let zip = ZipExecutor::new();
        let cmd = zip.compress_command(
            Path::new("/out/.duopane-x/a.zip"),
            Path::new("/home/me"),
            &[PathBuf::from("docs"), PathBuf::from("./-x")],
            9,
        );
        assert_eq!(cmd.get_args(), vec!["-r", "-9", "/out/.duopane-x/a.zip", "docs", "./-x"]);
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/home/me")));

        let cmd = zip.extract_command(Path::new("/a.zip"), Path::new("/dest"));
        assert_eq!(cmd.program(), "unzip");
        assert_eq!(cmd.get_args(), vec!["-o", "-d", "/dest", "/a.zip"]);
    }

    #[test]
    fn compress_lines() {
        assert_eq!(
            parse_compress_line("  adding: docs/a (b).txt (deflated 40%)"),
            Some("docs/a (b).txt")
        );
        assert_eq!(parse_compress_line("  adding: docs/ (stored 0%)"), Some("docs/"));
        assert_eq!(parse_compress_line("updating: x"), None);
    }

    #[test]
    fn extract_lines() {
        assert_eq!(
            parse_extract_line("  inflating: /dest/docs/a.txt  "),
            Some("/dest/docs/a.txt")
        );
        assert_eq!(parse_extract_line("   creating: /dest/docs/"), Some("/dest/docs/"));
        assert_eq!(parse_extract_line(" extracting: /dest/e.bin"), Some("/dest/e.bin"));
        assert_eq!(parse_extract_line("Archive:  /a.zip"), None);
    }

    #[test]
    fn listing() {
        let entries = parse_listing(LISTING);
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_directory());
        assert_eq!(entries[1], ArchiveEntry::file("photos/beach day.jpg", 204800));
        assert_eq!(entries[2].size, 17);
    }

    #[test]
    fn empty_archive_listing() {
        let output = "Archive:  e.zip\n  Length      Date    Time    Name\n---------  ---------- -----   ----\n---------                     -------\n        0                     0 files\n";
        assert!(parse_listing(output).is_empty());
    }
}
