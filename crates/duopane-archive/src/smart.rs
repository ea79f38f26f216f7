use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::entry::{ArchiveEntry, ArchiveMetadata, EntryKind, ExtractionStrategy};
use crate::error::{Access, ArchiveError, Result};
use crate::executor::FormatExecutor;
use crate::format::detect_format;
use crate::retry::{RetryConfig, with_retry};
use crate::security::{validate_file_name, validate_link_target, validate_path};

/// Inspects an archive's listing before anything is written.
#[derive(Clone, Debug, Default)]
pub struct SmartExtractor {
    retry: RetryConfig,
    timeout: Option<Duration>,
}

impl SmartExtractor {
    pub fn new(retry: RetryConfig, timeout: Option<Duration>) -> Self {
        Self { retry, timeout }
    }

    /// Choose between unpacking in place and unpacking into a new directory.
    pub async fn analyze_structure(
        &self,
        archive: &Path,
        cancel: &CancellationToken,
    ) -> Result<ExtractionStrategy> {
        let entries = self.list(archive, cancel).await?;
        Ok(ExtractionStrategy::from_entries(&entries))
    }

    /// Sizes and entries of `archive`, with every entry path and link target
    /// checked for traversal.
    pub async fn get_archive_metadata(
        &self,
        archive: &Path,
        cancel: &CancellationToken,
    ) -> Result<ArchiveMetadata> {
        let archive_size = tokio::fs::metadata(archive)
            .await
            .map_err(|err| ArchiveError::from_io(err, archive, Access::Read))?
            .len();
        let entries = self.list(archive, cancel).await?;
        for entry in &entries {
            validate_entry(entry)?;
        }
        let metadata = ArchiveMetadata::from_entries(archive_size, entries);
        debug!(
            archive = %archive.display(),
            files = metadata.file_count,
            extracted_size = metadata.extracted_size,
            "archive inspected"
        );
        Ok(metadata)
    }

    async fn list(&self, archive: &Path, cancel: &CancellationToken) -> Result<Vec<ArchiveEntry>> {
        let name = archive
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        let executor = FormatExecutor::new(detect_format(&name)?)?;
        with_retry(cancel, &self.retry, || {
            executor.list_contents(archive, cancel, self.timeout)
        })
        .await
    }
}

fn validate_entry(entry: &ArchiveEntry) -> Result<()> {
    validate_file_name(&entry.path)?;
    validate_path(&entry.path)?;
    match &entry.kind {
        EntryKind::Symlink { target } => validate_link_target(&entry.path, target, false),
        EntryKind::Hardlink { target } => validate_link_target(&entry.path, target, true),
        EntryKind::File | EntryKind::Directory => Ok(()),
    }
}
