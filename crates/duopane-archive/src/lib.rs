//! Archive creation and extraction driven by external tools.
//!
//! Every operation runs as a cancellable background task. Archive content is
//! screened before extraction (paths, link targets, size ratio, free space)
//! and the written tree is checked again afterwards.
//!
//! # Architecture
//!
//! - `controller.rs` - Request validation and task dispatch
//! - `executor/` - tar, zip and 7z command lines and output parsing
//! - `smart.rs` - Listing-based metadata and extraction layout
//! - `security.rs` - Path, name, hash, ratio and disk checks
//! - `retry.rs` - Backoff for transient I/O failures
//! - `progress.rs` - Progress snapshots
//! - `config.rs` - `[archive]` settings

pub use config::{ArchiveConfig, DiskSpaceCheck};
pub use controller::{ArchiveController, ArchiveTaskStatus};
pub use duopane_task::{Error as TaskError, TaskState};
pub use entry::{ArchiveEntry, ArchiveMetadata, EntryKind, ExtractMethod, ExtractionStrategy};
pub use error::{Access, ArchiveError, ErrorCode, Result};
pub use executor::{FormatExecutor, ProgressSender, SevenZipExecutor, TarExecutor, ZipExecutor};
pub use format::{ArchiveFormat, available_formats, detect_format, strip_archive_suffix};
pub use progress::{Operation, ProgressUpdate};
pub use retry::{RetryConfig, retry_delay, with_retry};
pub use smart::SmartExtractor;

pub mod config;
mod controller;
mod entry;
mod error;
pub mod executor;
mod format;
mod progress;
mod retry;
pub mod security;
mod smart;
