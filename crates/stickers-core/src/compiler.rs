//! Compilation of the input file into the ordered partials artifact.
//!
//! 1. Ensure the cache directory exists.
//! 2. Load the input file; its entry order is the artifact order.
//! 3. Split packs into cache hits and misses. Hits are read while the
//!    dispatcher works through the misses; hits whose entry turns out to be
//!    unreadable are fetched afterwards.
//! 4. Place every partial at its input position, skipping dropped packs, and
//!    write the artifact atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::{PackCache, DEFAULT_CACHE_DIR};
use crate::dispatch::FetchDispatcher;
use crate::error::{CompileError, CompileResult};
use crate::input::load_input;
use crate::report::{format_bytes, gzipped_size, CompileReport, DroppedPack, ProgressSink};
use crate::resolver::{PackResolver, Resolution};
use crate::source::ManifestSource;
use crate::types::{DispatchConfig, PackMetadata, StickerPackPartial};

/// Options for one compilation run.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// YAML file mapping pack ids to metadata.
    pub input_file: PathBuf,

    /// Where the JSON artifact is written.
    pub output_file: PathBuf,

    /// Directory holding one cached partial per pack.
    pub cache_dir: PathBuf,

    /// Fetch concurrency and retry settings.
    pub dispatch: DispatchConfig,
}

impl CompileOptions {
    pub fn new(input_file: impl Into<PathBuf>, output_file: impl Into<PathBuf>) -> Self {
        Self {
            input_file: input_file.into(),
            output_file: output_file.into(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            dispatch: DispatchConfig::default(),
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }
}

/// Compiles the input file into the partials artifact.
pub struct Compiler {
    options: CompileOptions,
    source: Arc<dyn ManifestSource>,
    progress: Option<ProgressSink>,
}

impl Compiler {
    pub fn new(options: CompileOptions, source: Arc<dyn ManifestSource>) -> Self {
        Self {
            options,
            source,
            progress: None,
        }
    }

    /// Report fetch progress to `sink`.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Run the compilation.
    ///
    /// Packs whose fetch fails permanently are left out and listed in
    /// [`CompileReport::dropped`]; only input, output and cache directory
    /// failures abort the run.
    pub async fn compile(&self) -> CompileResult<CompileReport> {
        let started = Instant::now();

        let cache = PackCache::with_dir(&self.options.cache_dir);
        cache.ensure_dir().await?;
        let cache_entries = cache.len().await?;
        info!(cache_dir = %self.options.cache_dir.display(), "cache directory");

        let records = load_input(&self.options.input_file).await?;
        let total = records.len();
        info!(
            input_file = %self.options.input_file.display(),
            packs = total,
            cache_entries,
            "loaded input file"
        );

        let positions: HashMap<String, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();

        let resolver = PackResolver::new(cache);
        let (hits, misses) = partition(&resolver, records).await;
        if !misses.is_empty() {
            info!(count = misses.len(), "fetching manifests");
        }

        let mut dispatcher =
            FetchDispatcher::new(self.source.clone(), self.options.dispatch.clone());
        if let Some(sink) = &self.progress {
            dispatcher = dispatcher.with_progress(sink.clone());
        }

        let (hit_results, mut resolutions) = tokio::join!(
            join_all(hits.iter().map(|record| resolver.lookup(record))),
            resolver.resolve_misses(misses, &dispatcher),
        );

        let mut refetch = Vec::new();
        for (record, found) in hits.into_iter().zip(hit_results) {
            match found {
                Some(partial) => resolutions.push(Ok(Resolution::Cached(partial))),
                None => refetch.push(record),
            }
        }
        if !refetch.is_empty() {
            warn!(count = refetch.len(), "re-fetching packs with unreadable cache entries");
            resolutions.extend(resolver.resolve_misses(refetch, &dispatcher).await);
        }

        let mut slots: Vec<Option<StickerPackPartial>> = vec![None; total];
        let mut dropped = Vec::new();
        let mut cache_hits = 0;
        let mut fetched = 0;

        for resolution in resolutions {
            let partial = match resolution? {
                Resolution::Cached(p) => {
                    cache_hits += 1;
                    p
                }
                Resolution::Fetched(p) => {
                    fetched += 1;
                    p
                }
                Resolution::Dropped(d) => {
                    dropped.push(d);
                    continue;
                }
            };
            match positions.get(partial.id()) {
                Some(&i) => slots[i] = Some(partial),
                None => debug!(id = %partial.id(), "resolved pack not in input, ignoring"),
            }
        }

        let artifact: Vec<StickerPackPartial> = slots.into_iter().flatten().collect();
        dropped.sort_by_key(|d: &DroppedPack| positions.get(&d.id).copied());

        let output_path = absolute(&self.options.output_file);
        info!(output_file = %output_path.display(), "writing output file");
        let (output_bytes, gzipped_bytes) = write_artifact(&output_path, &artifact).await?;

        let report = CompileReport {
            total,
            cache_hits,
            fetched,
            dropped,
            written: artifact.len(),
            output_path,
            output_bytes,
            gzipped_bytes,
            elapsed: started.elapsed(),
        };

        info!(elapsed_ms = report.elapsed.as_millis() as u64, "done");
        info!(rate = %format!("{}%", report.cache_hit_rate()), "cache hit rate");
        info!(size = %format_bytes(report.gzipped_bytes), "output file size (gzipped)");
        if report.is_degraded() {
            warn!(
                dropped = report.dropped.len(),
                "some packs could not be fetched and were left out"
            );
        }

        Ok(report)
    }
}

/// Split records by whether the cache holds an entry for them.
async fn partition(
    resolver: &PackResolver,
    records: Vec<PackMetadata>,
) -> (Vec<PackMetadata>, Vec<PackMetadata>) {
    let present = join_all(records.iter().map(|r| resolver.cache().has(&r.id))).await;

    let mut hits = Vec::new();
    let mut misses = Vec::new();
    for (record, present) in records.into_iter().zip(present) {
        if present {
            hits.push(record);
        } else {
            misses.push(record);
        }
    }
    debug!(hits = hits.len(), misses = misses.len(), "partitioned packs");
    (hits, misses)
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Serialize and write the artifact. Returns its raw and gzipped sizes.
async fn write_artifact(
    path: &Path,
    artifact: &[StickerPackPartial],
) -> CompileResult<(u64, u64)> {
    let mut json =
        serde_json::to_string_pretty(artifact).map_err(|e| CompileError::output(path, e))?;
    json.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CompileError::output(parent, e))?;
    }

    crate::fs::write_durable(path, json.as_bytes())
        .await
        .map_err(|e| CompileError::output(path, e))?;

    let gzipped = gzipped_size(json.as_bytes()).unwrap_or_else(|e| {
        warn!(error = %e, "failed to measure gzipped output size");
        0
    });
    Ok((json.len() as u64, gzipped))
}
