use std::fmt;
use std::str::FromStr;

use crate::error::{ArchiveError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    Zip,
    SevenZip,
    Unknown,
}

// Compound suffixes come first so ".tar.gz" never matches as ".gz" or ".tar".
const SUFFIXES: &[(&str, ArchiveFormat)] = &[
    (".tar.gz", ArchiveFormat::TarGz),
    (".tar.bz2", ArchiveFormat::TarBz2),
    (".tar.xz", ArchiveFormat::TarXz),
    (".tgz", ArchiveFormat::TarGz),
    (".tbz2", ArchiveFormat::TarBz2),
    (".tbz", ArchiveFormat::TarBz2),
    (".txz", ArchiveFormat::TarXz),
    (".tar", ArchiveFormat::Tar),
    (".zip", ArchiveFormat::Zip),
    (".7z", ArchiveFormat::SevenZip),
];

impl ArchiveFormat {
    /// Every format the engine can drive, in picker order.
    pub const ALL: [ArchiveFormat; 6] = [
        Self::Tar,
        Self::TarGz,
        Self::TarBz2,
        Self::TarXz,
        Self::Zip,
        Self::SevenZip,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
            Self::TarBz2 => "tar.bz2",
            Self::TarXz => "tar.xz",
            Self::Zip => "zip",
            Self::SevenZip => "7z",
            Self::Unknown => "unknown",
        }
    }

    /// Canonical file suffix, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Tar => ".tar",
            Self::TarGz => ".tar.gz",
            Self::TarBz2 => ".tar.bz2",
            Self::TarXz => ".tar.xz",
            Self::Zip => ".zip",
            Self::SevenZip => ".7z",
            Self::Unknown => "",
        }
    }

    /// External programs that must be on `PATH` to both create and extract.
    pub fn required_commands(self) -> &'static [&'static str] {
        match self {
            Self::Tar => &["tar"],
            Self::TarGz => &["tar", "gzip"],
            Self::TarBz2 => &["tar", "bzip2"],
            Self::TarXz => &["tar", "xz"],
            Self::Zip => &["zip", "unzip"],
            Self::SevenZip => &["7z"],
            Self::Unknown => &[],
        }
    }

    pub fn is_available(self) -> bool {
        self != Self::Unknown
            && duopane_platform::all_available(self.required_commands().iter().copied())
    }

    pub fn is_tar_family(self) -> bool {
        matches!(self, Self::Tar | Self::TarGz | Self::TarBz2 | Self::TarXz)
    }

    /// Codec letter for tar's short flags (`z`, `j`, `J`).
    pub(crate) fn tar_codec_flag(self) -> &'static str {
        match self {
            Self::TarGz => "z",
            Self::TarBz2 => "j",
            Self::TarXz => "J",
            _ => "",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveFormat {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "tar" => Ok(Self::Tar),
            "tar.gz" | "tgz" | "gz" => Ok(Self::TarGz),
            "tar.bz2" | "tbz2" | "tbz" | "bz2" => Ok(Self::TarBz2),
            "tar.xz" | "txz" | "xz" => Ok(Self::TarXz),
            "zip" => Ok(Self::Zip),
            "7z" => Ok(Self::SevenZip),
            other => Err(ArchiveError::unsupported_format(format!(
                "unknown archive format '{other}'"
            ))),
        }
    }
}

/// Detect the format from a file name by its longest known suffix.
pub fn detect_format(name: &str) -> Result<ArchiveFormat> {
    let lower = name.to_ascii_lowercase();
    SUFFIXES
        .iter()
        .find(|(suffix, _)| lower.ends_with(suffix) && lower.len() > suffix.len())
        .map(|(_, format)| *format)
        .ok_or_else(|| {
            ArchiveError::unsupported_format(format!("'{name}' is not a supported archive type"))
        })
}

/// Formats whose tools are all installed.
pub fn available_formats() -> Vec<ArchiveFormat> {
    ArchiveFormat::ALL
        .into_iter()
        .filter(|format| format.is_available())
        .collect()
}

/// Strip every known archive suffix from a file name, including a trailing
/// `.tar` left behind by a compression suffix.
pub fn strip_archive_suffix(name: &str) -> String {
    let mut stem = name.to_string();
    loop {
        let lower = stem.to_ascii_lowercase();
        match SUFFIXES.iter().find(|(suffix, _)| lower.ends_with(suffix)) {
            Some((suffix, _)) => stem.truncate(stem.len() - suffix.len()),
            None => break,
        }
    }
    if stem.is_empty() {
        "extracted".to_string()
    } else {
        stem
    }
}
