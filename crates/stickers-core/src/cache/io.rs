//! Cache file naming.

use std::path::{Path, PathBuf};

/// Whether `id` can be used as a cache file name as-is.
pub(crate) fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.starts_with('.')
        && !id.contains(['/', '\\', '\0'])
}

pub(crate) fn entry_path(cache_dir: &Path, id: &str) -> PathBuf {
    cache_dir.join(format!("{}.json", id))
}
