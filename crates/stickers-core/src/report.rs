//! Progress events and run statistics.
//!
//! Nothing here affects whether a run succeeds; the numbers are advisory.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;

/// One progress update: how many fetches are done and total count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub done: usize,
    pub total: usize,
}

/// Sink for progress events. The dispatcher calls this each time a fetch
/// task completes, successfully or not.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// A pack left out of the artifact because its fetch failed permanently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedPack {
    pub id: String,
    pub error: String,
}

/// Summary of one compilation run.
#[derive(Debug, Clone)]
pub struct CompileReport {
    /// Packs listed in the input file.
    pub total: usize,

    /// Packs served from the cache.
    pub cache_hits: usize,

    /// Packs fetched from the remote source.
    pub fetched: usize,

    /// Packs dropped after exhausting retries.
    pub dropped: Vec<DroppedPack>,

    /// Entries written to the artifact.
    pub written: usize,

    /// Where the artifact was written.
    pub output_path: PathBuf,

    /// Artifact size in bytes.
    pub output_bytes: u64,

    /// Artifact size after gzip compression.
    pub gzipped_bytes: u64,

    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl CompileReport {
    /// Percentage of packs served from the cache, rounded down.
    pub fn cache_hit_rate(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (self.cache_hits * 100 / self.total) as u32
    }

    /// Whether some packs were dropped.
    pub fn is_degraded(&self) -> bool {
        !self.dropped.is_empty()
    }
}

/// Size of `bytes` once gzip-compressed.
pub fn gzipped_size(bytes: &[u8]) -> std::io::Result<u64> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?.len() as u64)
}

/// Human-readable byte count, e.g. `1.5KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{}B", bytes)
    } else {
        let s = format!("{:.2}", value);
        let s = s.trim_end_matches('0').trim_end_matches('.');
        format!("{}{}", s, UNITS[unit])
    }
}
