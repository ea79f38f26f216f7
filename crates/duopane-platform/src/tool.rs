use std::path::PathBuf;

/// Resolve `name` on `PATH`.
pub fn locate(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

pub fn is_available(name: &str) -> bool {
    locate(name).is_some()
}

/// True when every tool in `names` resolves.
pub fn all_available<'a>(names: impl IntoIterator<Item = &'a str>) -> bool {
    names.into_iter().all(is_available)
}
