use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use duopane_task::TaskFailure;
use serde::Serialize;

/// Closed set of failure classes. The string forms are stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SourceNotFound,
    PermissionDeniedRead,
    PermissionDeniedWrite,
    DiskSpaceInsufficient,
    UnsupportedFormat,
    Corrupted,
    InvalidName,
    PathTraversal,
    CompressionBomb,
    OperationCancelled,
    IoError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceNotFound => "SOURCE_NOT_FOUND",
            Self::PermissionDeniedRead => "PERMISSION_DENIED_READ",
            Self::PermissionDeniedWrite => "PERMISSION_DENIED_WRITE",
            Self::DiskSpaceInsufficient => "DISK_SPACE_INSUFFICIENT",
            Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            Self::Corrupted => "CORRUPTED",
            Self::InvalidName => "INVALID_NAME",
            Self::PathTraversal => "PATH_TRAVERSAL",
            Self::CompressionBomb => "COMPRESSION_BOMB",
            Self::OperationCancelled => "OPERATION_CANCELLED",
            Self::IoError => "IO_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Only transient I/O failures are worth another attempt.
    pub fn is_retriable(self) -> bool {
        self == Self::IoError
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a file access, used to pick the permission-denied code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Error reported by every archive operation.
///
/// `message` is meant for users, `detail` for diagnostics. The optional cause is
/// shared so that status snapshots can be cloned freely.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ArchiveError {
    code: ErrorCode,
    message: String,
    detail: String,
    #[source]
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: String::new(),
            cause: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn is_retriable(&self) -> bool {
        self.code.is_retriable()
    }

    pub fn source_not_found(path: &Path) -> Self {
        Self::new(
            ErrorCode::SourceNotFound,
            format!("'{}' does not exist", path.display()),
        )
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedFormat, message)
    }

    pub fn path_traversal(entry: impl fmt::Display, reason: &str) -> Self {
        Self::new(
            ErrorCode::PathTraversal,
            format!("unsafe path '{entry}': {reason}"),
        )
    }

    pub fn invalid_name(name: impl fmt::Display, reason: &str) -> Self {
        Self::new(
            ErrorCode::InvalidName,
            format!("invalid name '{name}': {reason}"),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::OperationCancelled, "operation cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Classify an I/O failure on `path`.
    pub fn from_io(err: io::Error, path: &Path, access: Access) -> Self {
        let code = match (err.kind(), access) {
            (io::ErrorKind::NotFound, _) => ErrorCode::SourceNotFound,
            (io::ErrorKind::PermissionDenied, Access::Read) => ErrorCode::PermissionDeniedRead,
            (io::ErrorKind::PermissionDenied, Access::Write) => ErrorCode::PermissionDeniedWrite,
            _ => ErrorCode::IoError,
        };
        let verb = match access {
            Access::Read => "read",
            Access::Write => "write",
        };
        Self::new(code, format!("cannot {verb} '{}'", path.display()))
            .with_detail(err.to_string())
            .with_cause(err)
    }

    /// Classify a failed external tool run.
    pub fn from_command(err: duopane_platform::Error, operation: &str) -> Self {
        use duopane_platform::Error as CommandError;

        let (code, message) = match &err {
            CommandError::Cancelled { .. } | CommandError::TimedOut { .. } => {
                (ErrorCode::OperationCancelled, format!("{operation} cancelled"))
            }
            CommandError::NotFound { cmd } => (
                ErrorCode::UnsupportedFormat,
                format!("{operation} needs '{cmd}', which is not installed"),
            ),
            CommandError::Failed { stderr, .. } => {
                (classify_tool_failure(stderr), format!("{operation} failed"))
            }
            CommandError::Spawn { .. } | CommandError::Io(_) => {
                (ErrorCode::IoError, format!("{operation} failed"))
            }
        };
        let detail = err.to_string();
        Self::new(code, message).with_detail(detail).with_cause(err)
    }
}

impl TaskFailure for ArchiveError {
    fn cancelled() -> Self {
        ArchiveError::cancelled()
    }

    fn panicked(message: String) -> Self {
        ArchiveError::internal("archive task crashed").with_detail(message)
    }
}

/// Map a tool's stderr to an error class.
pub fn classify_tool_failure(stderr: &str) -> ErrorCode {
    const CORRUPTED: &[&str] = &[
        "unexpected end",
        "unexpected eof",
        "not in gzip format",
        "does not look like a tar archive",
        "unrecognized archive format",
        "end-of-central-directory",
        "cannot find zipfile directory",
        "can not open the file as archive",
        "cannot open the file as archive",
        "corrupt",
        "crc error",
        "bad crc",
        "data error",
        "headers error",
        "format violated",
    ];
    const NOT_FOUND: &[&str] = &["no such file", "cannot stat", "name not matched"];

    let lower = stderr.to_lowercase();
    if lower.contains("no space left") || lower.contains("disk full") {
        ErrorCode::DiskSpaceInsufficient
    } else if lower.contains("permission denied") || lower.contains("access is denied") {
        ErrorCode::PermissionDeniedWrite
    } else if CORRUPTED.iter().any(|needle| lower.contains(needle)) {
        ErrorCode::Corrupted
    } else if NOT_FOUND.iter().any(|needle| lower.contains(needle)) {
        ErrorCode::SourceNotFound
    } else {
        ErrorCode::IoError
    }
}
