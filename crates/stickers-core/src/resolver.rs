//! Per-pack resolution: cache lookup, remote fetch on miss, cache write-back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::PackCache;
use crate::dispatch::{FetchDispatcher, FetchHandler, FetchTask};
use crate::error::{CompileError, CompileResult};
use crate::report::DroppedPack;
use crate::types::{PackMetadata, RemoteManifest, StickerPackPartial};

/// How a pack was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Served from the cache; no network access.
    Cached(StickerPackPartial),

    /// Fetched from the remote source and written to the cache.
    Fetched(StickerPackPartial),

    /// Every fetch attempt failed; the pack is left out of the artifact.
    Dropped(DroppedPack),
}

impl Resolution {
    /// The compiled partial, unless the pack was dropped.
    pub fn partial(&self) -> Option<&StickerPackPartial> {
        match self {
            Self::Cached(p) | Self::Fetched(p) => Some(p),
            Self::Dropped(_) => None,
        }
    }

    pub fn into_partial(self) -> Option<StickerPackPartial> {
        match self {
            Self::Cached(p) | Self::Fetched(p) => Some(p),
            Self::Dropped(_) => None,
        }
    }
}

/// Assemble a partial from a fetched manifest and the pack's input metadata.
pub fn build_partial(record: &PackMetadata, manifest: RemoteManifest) -> StickerPackPartial {
    StickerPackPartial {
        manifest: manifest.project(),
        meta: record.clone(),
    }
}

/// Resolves packs against the cache, falling back to the dispatcher.
#[derive(Debug, Clone)]
pub struct PackResolver {
    cache: PackCache,
}

impl PackResolver {
    pub fn new(cache: PackCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &PackCache {
        &self.cache
    }

    /// Look `record` up in the cache.
    ///
    /// The cached manifest projection is reused and `meta` is rebuilt from
    /// `record`, so the result matches the stored partial whenever the input
    /// entry is unchanged. A corrupt entry counts as a miss.
    pub async fn lookup(&self, record: &PackMetadata) -> Option<StickerPackPartial> {
        if !self.cache.has(&record.id).await {
            debug!(id = %record.id, "cache miss");
            return None;
        }

        match self.cache.read(&record.id).await {
            Ok(cached) => Some(StickerPackPartial {
                manifest: cached.manifest,
                meta: record.clone(),
            }),
            Err(e) => {
                warn!(id = %record.id, error = %e, "ignoring unreadable cache entry");
                None
            }
        }
    }

    /// Resolve a single pack.
    ///
    /// Only cache write failures are returned as errors; a failed fetch
    /// yields [`Resolution::Dropped`].
    pub async fn resolve(
        &self,
        record: &PackMetadata,
        dispatcher: &FetchDispatcher,
    ) -> CompileResult<Resolution> {
        if let Some(partial) = self.lookup(record).await {
            return Ok(Resolution::Cached(partial));
        }

        self.resolve_misses(vec![record.clone()], dispatcher)
            .await
            .pop()
            .unwrap_or_else(|| {
                Ok(Resolution::Dropped(DroppedPack {
                    id: record.id.clone(),
                    error: "fetch task did not complete".to_string(),
                }))
            })
    }

    /// Fetch every record through `dispatcher`, bypassing the cache lookup.
    ///
    /// Results are in completion order.
    pub async fn resolve_misses(
        &self,
        records: Vec<PackMetadata>,
        dispatcher: &FetchDispatcher,
    ) -> Vec<CompileResult<Resolution>> {
        let tasks = records
            .iter()
            .map(|r| FetchTask::new(r.id.clone(), r.key.clone()))
            .collect();

        let handler = Arc::new(MissHandler {
            cache: self.cache.clone(),
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        });

        dispatcher.run(tasks, handler).await
    }
}

/// Completion actions for cache misses.
struct MissHandler {
    cache: PackCache,
    records: HashMap<String, PackMetadata>,
}

#[async_trait]
impl FetchHandler for MissHandler {
    type Output = CompileResult<Resolution>;

    async fn on_success(&self, task: FetchTask, manifest: RemoteManifest) -> Self::Output {
        let record = self
            .records
            .get(&task.id)
            .cloned()
            .unwrap_or_else(|| PackMetadata::new(task.id.clone(), task.key.clone()));

        let partial = build_partial(&record, manifest);
        self.cache.write(&task.id, &partial).await?;

        debug!(id = %task.id, "fetched manifest");
        Ok(Resolution::Fetched(partial))
    }

    async fn on_failure(&self, task: FetchTask, error: CompileError) -> Self::Output {
        warn!(id = %task.id, error = %error, "dropping pack after exhausting retries");
        Ok(Resolution::Dropped(DroppedPack {
            id: task.id,
            error: error.to_string(),
        }))
    }
}
