use std::collections::BTreeSet;

/// One row of an archive listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub size: u64,
    pub kind: EntryKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink { target: String },
    Hardlink { target: String },
}

impl ArchiveEntry {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            kind: EntryKind::File,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            kind: EntryKind::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    pub fn link_target(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Symlink { target } | EntryKind::Hardlink { target } => Some(target),
            _ => None,
        }
    }

    /// First path segment, ignoring a leading `./` and trailing `/`.
    pub fn root_segment(&self) -> Option<&str> {
        root_segment(&self.path)
    }
}

pub(crate) fn root_segment(path: &str) -> Option<&str> {
    let trimmed = path.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    let trimmed = trimmed.trim_start_matches('/').trim_end_matches('/');
    trimmed
        .split('/')
        .find(|segment| !segment.is_empty() && *segment != ".")
}

/// Facts about an archive gathered from its own listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveMetadata {
    pub archive_size: u64,
    pub extracted_size: u64,
    pub file_count: u64,
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveMetadata {
    pub fn from_entries(archive_size: u64, entries: Vec<ArchiveEntry>) -> Self {
        Self {
            archive_size,
            extracted_size: entries.iter().map(|entry| entry.size).sum(),
            file_count: entries.len() as u64,
            entries,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractMethod {
    /// The archive has a single root; unpack straight into the destination.
    ExtractDirect,
    /// Unpack into a new directory named after the archive.
    ExtractToDirectory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtractionStrategy {
    pub method: ExtractMethod,
}

impl ExtractionStrategy {
    pub fn from_paths<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        let roots: BTreeSet<&str> = paths.into_iter().filter_map(root_segment).collect();
        let method = if roots.len() == 1 {
            ExtractMethod::ExtractDirect
        } else {
            ExtractMethod::ExtractToDirectory
        };
        Self { method }
    }

    pub fn from_entries(entries: &[ArchiveEntry]) -> Self {
        Self::from_paths(entries.iter().map(|entry| entry.path.as_str()))
    }
}
