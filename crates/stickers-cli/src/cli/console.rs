//! Terminal output: fetch progress and the end-of-run summary.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use stickers_core::{format_bytes, CompileReport, ProgressEvent, ProgressSink};

/// Minimum interval between progress lines.
const PROGRESS_MIN_INTERVAL_MS: u64 = 200;

#[must_use]
pub fn format_progress_line(done: usize, total: usize) -> String {
    format!("Fetching manifests {}/{}...", done, total)
}

/// Progress is shown unless disabled explicitly or running under CI.
pub fn progress_enabled(no_progress: bool) -> bool {
    !no_progress && std::env::var_os("CI").is_none()
}

/// Returns a sink that prints throttled progress lines to stderr.
/// The final update of a batch is always printed.
pub fn progress_sink() -> ProgressSink {
    let last_emit: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    Arc::new(move |ev: ProgressEvent| {
        if ev.total == 0 {
            return;
        }
        let now = Instant::now();
        let should_emit = {
            let mut last = last_emit.lock().unwrap_or_else(PoisonError::into_inner);
            let interval_ok = last
                .map(|t| {
                    now.saturating_duration_since(t)
                        >= Duration::from_millis(PROGRESS_MIN_INTERVAL_MS)
                })
                .unwrap_or(true);
            let ok = ev.done == ev.total || interval_ok;
            if ok {
                *last = Some(now);
            }
            ok
        };
        if should_emit {
            eprintln!("{}", format_progress_line(ev.done, ev.total));
        }
    })
}

/// Print the run summary to stderr.
pub fn print_summary(report: &CompileReport) {
    eprintln!(
        "Compiled {} of {} packs in {:.2}s ({} from cache, {} fetched)",
        report.written,
        report.total,
        report.elapsed.as_secs_f64(),
        report.cache_hits,
        report.fetched
    );
    eprintln!("Cache hit rate: {}%", report.cache_hit_rate());
    eprintln!(
        "Output: {} ({}, {} gzipped)",
        report.output_path.display(),
        format_bytes(report.output_bytes),
        format_bytes(report.gzipped_bytes)
    );
    if report.is_degraded() {
        eprintln!("Dropped {} packs:", report.dropped.len());
        for d in &report.dropped {
            eprintln!("  {}: {}", d.id, d.error);
        }
    }
}
