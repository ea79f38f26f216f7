//! Format executors: one per tool family, behind a closed enum.
//!
//! Each executor only builds command lines and parses tool output. The shared
//! pipeline here resolves paths, stages writes, runs the tool, and reports
//! progress.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use duopane_platform::{Command, Output};
use duopane_task::ProgressSink;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::entry::{ArchiveEntry, EntryKind, root_segment};
use crate::error::{Access, ArchiveError, ErrorCode, Result};
use crate::format::ArchiveFormat;
use crate::progress::{Operation, ProgressTracker, ProgressUpdate};
use crate::security::{sanitize_path_for_command, validate_symlinks_under};

pub use self::sevenzip::SevenZipExecutor;
pub use self::tar::TarExecutor;
pub use self::zip::ZipExecutor;

mod sevenzip;
mod tar;
mod zip;

pub type ProgressSender = ProgressSink<ProgressUpdate>;

#[derive(Clone, Debug)]
pub enum FormatExecutor {
    Tar(TarExecutor),
    Zip(ZipExecutor),
    SevenZip(SevenZipExecutor),
}

impl FormatExecutor {
    pub fn new(format: ArchiveFormat) -> Result<Self> {
        match format {
            format if format.is_tar_family() => Ok(Self::Tar(TarExecutor::new(format))),
            ArchiveFormat::Zip => Ok(Self::Zip(ZipExecutor::new())),
            ArchiveFormat::SevenZip => Ok(Self::SevenZip(SevenZipExecutor::new())),
            _ => Err(ArchiveError::unsupported_format(
                "no executor for an unknown archive format",
            )),
        }
    }

    fn compress_command(
        &self,
        temp: &Path,
        base: &Path,
        sources: &[PathBuf],
        level: u32,
    ) -> Command {
        match self {
            Self::Tar(tar) => tar.compress_command(temp, base, sources),
            Self::Zip(zip) => zip.compress_command(temp, base, sources, level),
            Self::SevenZip(sz) => sz.compress_command(temp, base, sources, level),
        }
    }

    fn extract_command(&self, archive: &Path, dest: &Path) -> Command {
        match self {
            Self::Tar(tar) => tar.extract_command(archive, dest),
            Self::Zip(zip) => zip.extract_command(archive, dest),
            Self::SevenZip(sz) => sz.extract_command(archive, dest),
        }
    }

    fn list_command(&self, archive: &Path) -> Command {
        match self {
            Self::Tar(tar) => tar.list_command(archive),
            Self::Zip(zip) => zip.list_command(archive),
            Self::SevenZip(sz) => sz.list_command(archive),
        }
    }

    fn parse_progress_line<'a>(&self, operation: Operation, line: &'a str) -> Option<&'a str> {
        match (self, operation) {
            (Self::Tar(_), _) => tar::parse_progress_line(line),
            (Self::Zip(_), Operation::Compress) => zip::parse_compress_line(line),
            (Self::Zip(_), Operation::Extract) => zip::parse_extract_line(line),
            (Self::SevenZip(_), Operation::Compress) => sevenzip::parse_compress_line(line),
            (Self::SevenZip(_), Operation::Extract) => sevenzip::parse_extract_line(line),
        }
    }

    /// Parse the tool's verbose listing into entries.
    pub fn parse_listing(&self, output: &str) -> Vec<ArchiveEntry> {
        match self {
            Self::Tar(_) => tar::parse_listing(output),
            Self::Zip(_) => zip::parse_listing(output),
            Self::SevenZip(_) => sevenzip::parse_listing(output),
        }
    }

    /// Archive `sources` into `output`.
    ///
    /// The tool writes into a private staging directory next to `output`; the
    /// result is renamed into place only after the tool succeeds.
    pub async fn compress(
        &self,
        sources: &[PathBuf],
        output: &Path,
        level: u32,
        progress: Option<&ProgressSender>,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let output = absolute(output)?;
        let sources = sources
            .iter()
            .map(|source| absolute(source))
            .collect::<Result<Vec<_>>>()?;
        let out_dir = output
            .parent()
            .ok_or_else(|| ArchiveError::invalid_name(output.display(), "no parent directory"))?;
        if !out_dir.is_dir() {
            return Err(ArchiveError::new(
                ErrorCode::SourceNotFound,
                format!("output directory '{}' does not exist", out_dir.display()),
            ));
        }
        let file_name = output
            .file_name()
            .ok_or_else(|| ArchiveError::invalid_name(output.display(), "no file name"))?;

        let base = common_base(&sources).ok_or_else(|| {
            ArchiveError::invalid_name("/", "cannot archive a filesystem root")
        })?;
        let relative: Vec<PathBuf> = sources
            .iter()
            .map(|source| source.strip_prefix(&base).unwrap_or(source.as_path()))
            .map(sanitize_path_for_command)
            .collect();

        let scan = {
            let base = base.clone();
            let relative = relative.clone();
            tokio::task::spawn_blocking(move || prescan(&base, &relative))
                .await
                .map_err(|err| {
                    ArchiveError::internal("source scan failed").with_detail(err.to_string())
                })?
        };
        let initial = ProgressUpdate::new(Operation::Compress, output.clone())
            .with_totals(scan.files, scan.bytes);
        let mut tracker = ProgressTracker::new(initial).with_sizes(scan.sizes);
        if let Some(sink) = progress {
            sink.deliver(tracker.snapshot()).await;
        }

        let staging = tempfile::Builder::new()
            .prefix(".duopane-")
            .tempdir_in(out_dir)
            .map_err(|err| ArchiveError::from_io(err, out_dir, Access::Write))?;
        let temp = staging.path().join(file_name);

        info!(
            archive = %output.display(),
            base = %base.display(),
            entries = scan.files,
            "compressing"
        );
        let command = self
            .compress_command(&temp, &base, &relative, level)
            .timeout(timeout);
        self.run(command, Operation::Compress, progress, &mut tracker, None, cancel)
            .await
            .map_err(|err| ArchiveError::from_command(err, "compression"))?;

        tokio::fs::rename(&temp, &output)
            .await
            .map_err(|err| ArchiveError::from_io(err, &output, Access::Write))?;
        drop(staging);

        if let Some(sink) = progress {
            sink.deliver(tracker.finish()).await;
        }
        Ok(())
    }

    /// Unpack `archive` into `dest`, then remove any symlink it planted that
    /// points outside `dest`.
    pub async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        progress: Option<&ProgressSender>,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let archive = absolute(archive)?;
        let dest = absolute(dest)?;
        tokio::fs::create_dir_all(&dest)
            .await
            .map_err(|err| ArchiveError::from_io(err, &dest, Access::Write))?;

        let listing = match self.list_contents(&archive, cancel, timeout).await {
            Ok(entries) => Some(entries),
            Err(err) if err.code() == ErrorCode::OperationCancelled => return Err(err),
            Err(err) => {
                debug!(
                    archive = %archive.display(),
                    error = %err,
                    "listing failed, progress totals unknown"
                );
                None
            }
        };
        let entries = listing.as_deref().unwrap_or_default();
        let total_files = (entries.len() as u64).max(1);
        let total_bytes = entries.iter().map(|entry| entry.size).sum();
        let sizes = entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::File)
            .map(|entry| (normalize_name(&entry.path).to_string(), entry.size))
            .collect();

        let initial = ProgressUpdate::new(Operation::Extract, archive.clone())
            .with_totals(total_files, total_bytes);
        let mut tracker = ProgressTracker::new(initial).with_sizes(sizes);
        if let Some(sink) = progress {
            sink.deliver(tracker.snapshot()).await;
        }

        info!(archive = %archive.display(), dest = %dest.display(), "extracting");
        let command = self.extract_command(&archive, &dest).timeout(timeout);
        let dest_prefix = format!("{}/", dest.display());
        self.run(
            command,
            Operation::Extract,
            progress,
            &mut tracker,
            Some(&dest_prefix),
            cancel,
        )
        .await
        .map_err(|err| ArchiveError::from_command(err, "extraction"))?;

        // Only the roots this archive created are walked when they are known.
        let roots: Vec<PathBuf> = match &listing {
            Some(entries) if !entries.is_empty() => entries
                .iter()
                .filter_map(|entry| root_segment(&entry.path))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            _ => vec![PathBuf::new()],
        };
        let walk_root = dest.clone();
        tokio::task::spawn_blocking(move || validate_symlinks_under(&walk_root, &roots))
            .await
            .map_err(|err| {
                ArchiveError::internal("symlink check failed").with_detail(err.to_string())
            })??;

        if let Some(sink) = progress {
            sink.deliver(tracker.finish()).await;
        }
        Ok(())
    }

    /// Entries of `archive` as reported by the tool's listing.
    pub async fn list_contents(
        &self,
        archive: &Path,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Vec<ArchiveEntry>> {
        let archive = absolute(archive)?;
        let output = self
            .list_command(&archive)
            .timeout(timeout)
            .output(cancel)
            .await
            .map_err(|err| ArchiveError::from_command(err, "listing"))?;
        Ok(self.parse_listing(&output.stdout))
    }

    async fn run(
        &self,
        command: Command,
        operation: Operation,
        progress: Option<&ProgressSender>,
        tracker: &mut ProgressTracker,
        strip: Option<&str>,
        cancel: &CancellationToken,
    ) -> duopane_platform::Result<Output> {
        let Some(sink) = progress else {
            return command.output(cancel).await;
        };
        command
            .stream_lines(cancel, |line| {
                let name = self
                    .parse_progress_line(operation, line)
                    .ok_or("not a progress line")?;
                let name = strip.and_then(|prefix| name.strip_prefix(prefix)).unwrap_or(name);
                sink.emit(tracker.advance(name));
                Ok(())
            })
            .await
    }
}

struct Prescan {
    files: u64,
    bytes: u64,
    sizes: HashMap<String, u64>,
}

/// Count every entry the tool will print and record regular file sizes under
/// the names the tool prints them with.
fn prescan(base: &Path, relative: &[PathBuf]) -> Prescan {
    let mut scan = Prescan {
        files: 0,
        bytes: 0,
        sizes: HashMap::new(),
    };
    for source in relative {
        for entry in WalkDir::new(base.join(source)).follow_links(false) {
            let Ok(entry) = entry else { continue };
            scan.files += 1;
            if !entry.file_type().is_file() {
                continue;
            }
            let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            scan.bytes += size;
            if let Ok(name) = entry.path().strip_prefix(base) {
                scan.sizes
                    .insert(normalize_name(&name.to_string_lossy()).to_string(), size);
            }
        }
    }
    scan
}

/// Parent of the first source, or the deepest directory containing every
/// source's parent.
pub(crate) fn common_base(sources: &[PathBuf]) -> Option<PathBuf> {
    let first = sources.first()?.parent()?;
    if sources.iter().all(|source| source.starts_with(first) && source != first) {
        return Some(first.to_path_buf());
    }

    let mut base: Vec<Component<'_>> = first.components().collect();
    for source in &sources[1..] {
        let parent = source.parent()?;
        let shared = base
            .iter()
            .zip(parent.components())
            .take_while(|(a, b)| *a == b)
            .count();
        base.truncate(shared);
    }
    if base.is_empty() {
        return None;
    }
    Some(base.iter().collect())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|err| ArchiveError::from_io(err, path, Access::Read))
}

fn normalize_name(name: &str) -> &str {
    name.trim_start_matches("./").trim_end_matches('/')
}

/// Split off the first `n` whitespace-separated fields and return the rest of
/// the line with its inner spacing intact.
pub(crate) fn split_fields(line: &str, n: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(n);
    let mut rest = line.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    let rest = rest.trim_end();
    (!rest.is_empty()).then_some((fields, rest))
}

/// Dashed rule lines that frame `unzip -l` and `7z l` tables.
pub(crate) fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("---") && line.chars().all(|c| c == '-' || c == ' ')
}
