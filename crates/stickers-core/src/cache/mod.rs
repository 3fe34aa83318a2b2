//! Local cache of compiled pack partials.
//!
//! A cache entry proves that the remote fetch for its pack id does not need
//! to be repeated. Entries never expire; they are only replaced wholesale or
//! removed by the operator.
//!
//! # Cache Structure
//!
//! ```text
//! .sticker-partials-cache/
//!   {id}.json        # StickerPackPartial for pack {id}
//! ```

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{CompileError, CompileResult};
use crate::types::StickerPackPartial;

mod io;

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".sticker-partials-cache";

/// On-disk store of compiled partials keyed by pack id.
#[derive(Debug, Clone)]
pub struct PackCache {
    /// Base cache directory.
    cache_dir: PathBuf,
}

impl PackCache {
    /// Create a cache rooted at `cache_dir`. Nothing is touched on disk until
    /// [`ensure_dir`](Self::ensure_dir) or [`write`](Self::write).
    pub fn with_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Get the cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Create the cache directory if it does not exist.
    pub async fn ensure_dir(&self) -> CompileResult<()> {
        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| CompileError::cache_dir(&self.cache_dir, e))
    }

    /// Whether an entry exists for `id`. Never fails.
    pub async fn has(&self, id: &str) -> bool {
        if !io::is_safe_id(id) {
            return false;
        }
        fs::try_exists(io::entry_path(&self.cache_dir, id))
            .await
            .unwrap_or(false)
    }

    /// Read the entry for `id`.
    ///
    /// Returns `CacheCorrupt` if the entry cannot be read or does not
    /// deserialize to a partial for this id.
    pub async fn read(&self, id: &str) -> CompileResult<StickerPackPartial> {
        let corrupt = |message: String| CompileError::CacheCorrupt {
            id: id.to_string(),
            message,
        };

        if !io::is_safe_id(id) {
            return Err(corrupt("id is not a valid cache key".to_string()));
        }

        let bytes = fs::read(io::entry_path(&self.cache_dir, id))
            .await
            .map_err(|e| corrupt(format!("failed to read cache entry: {}", e)))?;

        let partial: StickerPackPartial = serde_json::from_slice(&bytes)
            .map_err(|e| corrupt(format!("failed to parse cache entry: {}", e)))?;

        if partial.id() != id {
            return Err(corrupt(format!("entry belongs to pack {}", partial.id())));
        }

        debug!(id, "cache hit");
        Ok(partial)
    }

    /// Persist the entry for `id`, replacing any previous one.
    ///
    /// The entry is flushed to disk before this returns. Ids that are not
    /// valid file names are skipped.
    pub async fn write(&self, id: &str, partial: &StickerPackPartial) -> CompileResult<()> {
        if !io::is_safe_id(id) {
            debug!(id, "pack id is not a valid cache key, not caching");
            return Ok(());
        }

        let json = serde_json::to_vec_pretty(partial).map_err(|e| CompileError::CacheDir {
            path: self.cache_dir.clone(),
            message: format!("failed to serialize cache entry for {}: {}", id, e),
        })?;

        let path = io::entry_path(&self.cache_dir, id);
        crate::fs::write_durable(&path, &json)
            .await
            .map_err(|e| CompileError::cache_dir(&path, e))?;

        debug!(id, "cached partial");
        Ok(())
    }

    /// Remove the entry for `id`, if any.
    pub async fn evict(&self, id: &str) -> CompileResult<()> {
        if !io::is_safe_id(id) {
            return Ok(());
        }
        let path = io::entry_path(&self.cache_dir, id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CompileError::cache_dir(&path, e)),
        }
    }

    /// Number of entries in the cache. A missing directory counts as empty.
    pub async fn len(&self) -> CompileResult<usize> {
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CompileError::cache_dir(&self.cache_dir, e)),
        };

        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CompileError::cache_dir(&self.cache_dir, e))?
        {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> CompileResult<bool> {
        Ok(self.len().await? == 0)
    }
}

impl Default for PackCache {
    fn default() -> Self {
        Self::with_dir(DEFAULT_CACHE_DIR)
    }
}
