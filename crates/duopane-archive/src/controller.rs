use std::path::{Path, PathBuf};
use std::sync::Arc;

use duopane_task::{CancellationToken, TaskManager, TaskStatus};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{ArchiveConfig, DiskSpaceCheck};
use crate::entry::{ArchiveMetadata, ExtractMethod, ExtractionStrategy};
use crate::error::{Access, ArchiveError, ErrorCode, Result};
use crate::executor::FormatExecutor;
use crate::format::{ArchiveFormat, detect_format, strip_archive_suffix};
use crate::progress::{Operation, ProgressUpdate};
use crate::retry::with_retry;
use crate::security::{
    DiskSpaceError, calculate_file_hash, check_disk_space, exceeds_compression_ratio,
    verify_file_hash,
};
use crate::smart::SmartExtractor;

/// Status snapshot of an archive task.
pub type ArchiveTaskStatus = TaskStatus<ProgressUpdate, ArchiveError>;

const MAX_LEVEL: u32 = 9;

/// Entry point for the UI: validates requests and runs them as background tasks.
///
/// Construct one per application and share it.
pub struct ArchiveController {
    tasks: Arc<TaskManager<ProgressUpdate, ArchiveError>>,
    inspector: SmartExtractor,
    config: Arc<ArchiveConfig>,
}

impl ArchiveController {
    pub fn new(runtime: Handle, config: ArchiveConfig) -> Self {
        let tasks = TaskManager::new(runtime).with_progress_buffer(config.progress_buffer);
        Self {
            tasks: Arc::new(tasks),
            inspector: SmartExtractor::new(config.retry.clone(), config.command_timeout()),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Validate the request, then archive `sources` into `output` in the
    /// background. Returns the task id.
    pub fn create_archive(
        &self,
        sources: &[PathBuf],
        output: &Path,
        format: ArchiveFormat,
        level: u32,
    ) -> Result<String> {
        if sources.is_empty() {
            return Err(ArchiveError::new(
                ErrorCode::SourceNotFound,
                "nothing to archive",
            ));
        }
        if let Some(missing) = sources.iter().find(|source| source.symlink_metadata().is_err()) {
            return Err(ArchiveError::source_not_found(missing));
        }
        let executor = require_tools(format)?;
        if level > MAX_LEVEL {
            return Err(ArchiveError::unsupported_format(format!(
                "compression level {level} is outside 0..={MAX_LEVEL}"
            )));
        }

        let sources = sources
            .iter()
            .map(|source| absolute(source))
            .collect::<Result<Vec<_>>>()?;
        let output = absolute(output)?;
        let config = Arc::clone(&self.config);
        let id = self.tasks.start_task("compress", move |ctx| async move {
            let cancel = ctx.cancel_token();
            for source in &sources {
                check_readable(source).await?;
            }

            let total_bytes = {
                let sources = sources.clone();
                tokio::task::spawn_blocking(move || total_size(&sources))
                    .await
                    .map_err(|err| {
                        ArchiveError::internal("size scan failed").with_detail(err.to_string())
                    })?
            };
            let out_dir = output.parent().unwrap_or(Path::new("/"));
            check_space(config.disk_space_check, out_dir, total_bytes)?;
            if cancel.is_cancelled() {
                return Err(ArchiveError::cancelled());
            }

            ctx.progress()
                .deliver(
                    ProgressUpdate::new(Operation::Compress, output.clone())
                        .with_totals(0, total_bytes),
                )
                .await;

            info!(
                task_id = %ctx.id(),
                %format,
                archive = %output.display(),
                "creating archive"
            );
            executor
                .compress(
                    &sources,
                    &output,
                    level,
                    Some(ctx.progress()),
                    cancel,
                    config.command_timeout(),
                )
                .await
        });
        Ok(id)
    }

    /// Validate the request, then unpack `archive` under `dest` in the
    /// background. Returns the task id.
    pub fn extract_archive(&self, archive: &Path, dest: &Path) -> Result<String> {
        if archive.symlink_metadata().is_err() {
            return Err(ArchiveError::source_not_found(archive));
        }
        let name = file_name(archive);
        let format = detect_format(&name)?;
        let executor = require_tools(format)?;

        let archive = absolute(archive)?;
        let dest = absolute(dest)?;
        let config = Arc::clone(&self.config);
        let inspector = self.inspector.clone();
        let id = self.tasks.start_task("extract", move |ctx| async move {
            let cancel = ctx.cancel_token();

            // Baseline before the listing is read; compared again right
            // before the tool runs.
            let baseline =
                with_retry(cancel, &config.retry, || calculate_file_hash(&archive)).await?;

            let metadata = inspector.get_archive_metadata(&archive, cancel).await?;
            if exceeds_compression_ratio(
                metadata.archive_size,
                metadata.extracted_size,
                config.max_compression_ratio,
            ) {
                return Err(ArchiveError::new(
                    ErrorCode::CompressionBomb,
                    format!("'{}' expands suspiciously far", archive.display()),
                )
                .with_detail(format!(
                    "{} bytes unpack to {} bytes, limit is {}x",
                    metadata.archive_size, metadata.extracted_size, config.max_compression_ratio
                )));
            }
            check_space(config.disk_space_check, &dest, metadata.extracted_size)?;

            ctx.progress()
                .deliver(
                    ProgressUpdate::new(Operation::Extract, archive.clone())
                        .with_totals(metadata.file_count, metadata.extracted_size),
                )
                .await;

            let strategy = ExtractionStrategy::from_entries(&metadata.entries);
            let target = match strategy.method {
                ExtractMethod::ExtractDirect => dest.clone(),
                ExtractMethod::ExtractToDirectory => {
                    dest.join(strip_archive_suffix(&file_name(&archive)))
                }
            };
            debug!(
                task_id = %ctx.id(),
                ?strategy,
                target = %target.display(),
                "extraction layout"
            );

            verify_file_hash(&archive, &baseline).await?;
            if cancel.is_cancelled() {
                return Err(ArchiveError::cancelled());
            }

            info!(
                task_id = %ctx.id(),
                %format,
                archive = %archive.display(),
                "extracting archive"
            );
            executor
                .extract(
                    &archive,
                    &target,
                    Some(ctx.progress()),
                    cancel,
                    config.command_timeout(),
                )
                .await
        });
        Ok(id)
    }

    pub fn cancel_task(&self, id: &str) -> duopane_task::Result<()> {
        self.tasks.cancel_task(id)
    }

    pub fn get_task_status(&self, id: &str) -> Option<ArchiveTaskStatus> {
        self.tasks.get_task_status(id)
    }

    pub fn list_tasks(&self) -> Vec<ArchiveTaskStatus> {
        self.tasks.list_tasks()
    }

    pub async fn wait_for_task(&self, id: &str) {
        self.tasks.wait_for_task(id).await
    }

    pub fn cleanup_task(&self, id: &str) {
        self.tasks.cleanup_task(id)
    }

    /// Inspect an archive without extracting it.
    pub async fn get_archive_metadata(&self, archive: &Path) -> Result<ArchiveMetadata> {
        self.inspector
            .get_archive_metadata(archive, &CancellationToken::new())
            .await
    }

    pub async fn analyze_structure(&self, archive: &Path) -> Result<ExtractionStrategy> {
        self.inspector
            .analyze_structure(archive, &CancellationToken::new())
            .await
    }
}

fn require_tools(format: ArchiveFormat) -> Result<FormatExecutor> {
    let executor = FormatExecutor::new(format)?;
    if !format.is_available() {
        return Err(ArchiveError::unsupported_format(format!(
            "{format} needs {} on PATH",
            format.required_commands().join(", ")
        )));
    }
    Ok(executor)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|err| ArchiveError::from_io(err, path, Access::Read))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn check_readable(source: &Path) -> Result<()> {
    let read_err = |err| ArchiveError::from_io(err, source, Access::Read);
    let meta = tokio::fs::metadata(source).await.map_err(read_err)?;
    if meta.is_dir() {
        let mut entries = tokio::fs::read_dir(source).await.map_err(read_err)?;
        entries.next_entry().await.map_err(read_err)?;
    } else {
        tokio::fs::File::open(source).await.map_err(read_err)?;
    }
    Ok(())
}

/// Bytes of regular files under `sources`. Symlinks and unreadable entries
/// are skipped.
fn total_size(sources: &[PathBuf]) -> u64 {
    sources
        .iter()
        .flat_map(|source| WalkDir::new(source).follow_links(false))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

fn check_space(policy: DiskSpaceCheck, dir: &Path, required: u64) -> Result<()> {
    if policy == DiskSpaceCheck::Off {
        return Ok(());
    }
    match check_disk_space(dir, required) {
        Ok(()) => Ok(()),
        Err(DiskSpaceError::Query(err)) if policy == DiskSpaceCheck::BestEffort => {
            warn!(dir = %dir.display(), error = %err, "free space unknown, continuing");
            Ok(())
        }
        Err(err) => Err(ArchiveError::from_disk_space(err, dir)),
    }
}
