//! Bounded-concurrency fetch dispatcher.
//!
//! At most `concurrency` fetches are in flight at any instant; the remaining
//! tasks wait for a permit. A failed fetch is retried up to `retries` times
//! unless its error can never succeed (see [`CompileError::is_retryable`]),
//! and each task ends in exactly one call to either
//! [`FetchHandler::on_success`] or [`FetchHandler::on_failure`]. A failing
//! task never cancels or delays the others.
//!
//! Completion order is whatever the scheduler yields.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, warn};

use crate::error::{CompileError, CompileResult};
use crate::report::{ProgressEvent, ProgressSink};
use crate::source::ManifestSource;
use crate::types::{DispatchConfig, RemoteManifest};

/// One pending fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub id: String,
    pub key: String,
}

impl FetchTask {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
        }
    }
}

/// Per-task completion actions.
#[async_trait]
pub trait FetchHandler: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Called once when the fetch for `task` succeeds.
    async fn on_success(&self, task: FetchTask, manifest: RemoteManifest) -> Self::Output;

    /// Called once when every attempt for `task` has failed.
    async fn on_failure(&self, task: FetchTask, error: CompileError) -> Self::Output;
}

/// Executes fetch tasks with bounded parallelism and retries.
///
/// The concurrency bound is shared by every [`run`](Self::run) call on the
/// same dispatcher, including calls that overlap in time.
pub struct FetchDispatcher {
    source: Arc<dyn ManifestSource>,
    config: DispatchConfig,
    semaphore: Arc<Semaphore>,
    progress: Option<ProgressSink>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    done: Arc<AtomicUsize>,
    submitted: AtomicUsize,
}

impl FetchDispatcher {
    pub fn new(source: Arc<dyn ManifestSource>, config: DispatchConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            source,
            config,
            semaphore,
            progress: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            done: Arc::new(AtomicUsize::new(0)),
            submitted: AtomicUsize::new(0),
        }
    }

    /// Report each finished task to `sink`.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Highest number of fetches observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Run every task and return the handler outputs in completion order.
    ///
    /// Progress counts accumulate across calls on the same dispatcher. A task
    /// that panics is reported to [`FetchHandler::on_failure`] like any other
    /// failed fetch.
    pub async fn run<H: FetchHandler>(
        &self,
        tasks: Vec<FetchTask>,
        handler: Arc<H>,
    ) -> Vec<H::Output> {
        let count = tasks.len();
        let total = self.submitted.fetch_add(count, Ordering::SeqCst) + count;
        let mut join_set = JoinSet::new();
        let mut pending: HashMap<task::Id, FetchTask> = HashMap::with_capacity(count);

        for task in tasks {
            let sem = self.semaphore.clone();
            let source = self.source.clone();
            let config = self.config.clone();
            let handler = handler.clone();
            let progress = self.progress.clone();
            let done = self.done.clone();
            let in_flight = self.in_flight.clone();
            let peak = self.peak_in_flight.clone();
            let spawned = task.clone();

            let abort = join_set.spawn(async move {
                let result = match sem.acquire_owned().await {
                    Ok(_permit) => {
                        let _guard = InFlightGuard::enter(in_flight, &peak);
                        fetch_with_retry(source.as_ref(), &spawned, &config).await
                    }
                    Err(e) => Err(CompileError::Internal {
                        message: format!("fetch pool closed: {}", e),
                    }),
                };

                let output = match result {
                    Ok(manifest) => handler.on_success(spawned, manifest).await,
                    Err(e) => handler.on_failure(spawned, e).await,
                };

                report_done(&done, progress.as_ref(), total);
                output
            });
            pending.insert(abort.id(), task);
        }

        let mut outputs = Vec::with_capacity(count);
        while let Some(res) = join_set.join_next_with_id().await {
            match res {
                Ok((id, output)) => {
                    pending.remove(&id);
                    outputs.push(output);
                }
                Err(e) => {
                    error!(error = %e, "fetch task panicked");
                    let Some(task) = pending.remove(&e.id()) else {
                        continue;
                    };
                    let err = CompileError::Internal {
                        message: format!("fetch task for {} panicked", task.id),
                    };
                    outputs.push(handler.on_failure(task, err).await);
                    report_done(&self.done, self.progress.as_ref(), total);
                }
            }
        }
        outputs
    }
}

fn report_done(done: &AtomicUsize, progress: Option<&ProgressSink>, total: usize) {
    let done = done.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(sink) = progress {
        sink(ProgressEvent { done, total });
    }
}

/// Counts a fetch as in flight until dropped, including on unwind.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(in_flight: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn fetch_with_retry(
    source: &dyn ManifestSource,
    task: &FetchTask,
    config: &DispatchConfig,
) -> CompileResult<RemoteManifest> {
    let max_attempts = config.max_attempts();
    let mut attempt = 1;

    loop {
        debug!(id = %task.id, attempt, "fetching manifest");
        match source.fetch_manifest(&task.id, &task.key).await {
            Ok(manifest) => return Ok(manifest),
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                let backoff = backoff_for(&e, attempt, config);
                warn!(
                    id = %task.id,
                    error = %e,
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying manifest fetch"
                );
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Delay before retry number `attempt` (1-based).
///
/// A server-provided `Retry-After` is honoured (capped, ±10% jitter);
/// otherwise the delay doubles per attempt with full jitter.
fn backoff_for(err: &CompileError, attempt: u32, config: &DispatchConfig) -> Duration {
    if config.base_backoff.is_zero() {
        return Duration::ZERO;
    }

    match err {
        CompileError::RateLimited {
            retry_after: Some(retry_after),
        } => {
            let capped = (*retry_after).min(config.max_backoff);
            let base_ms = capped.as_millis() as u64;
            let jitter_factor: f64 = rand::thread_rng().gen_range(0.9_f64..=1.1_f64);
            let jittered_ms = ((base_ms as f64) * jitter_factor).round() as u64;
            Duration::from_millis(jittered_ms.max(100))
        }
        _ => {
            let factor = 1u32 << (attempt - 1).min(16);
            let base_backoff = config
                .base_backoff
                .saturating_mul(factor)
                .min(config.max_backoff);
            let jittered_ms = rand::thread_rng().gen_range(0..=base_backoff.as_millis() as u64);
            Duration::from_millis(jittered_ms.max(10))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StickerRef;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FlakySource {
        failures_before_success: HashMap<String, usize>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl FlakySource {
        fn new(failures: &[(&str, usize)]) -> Self {
            Self {
                failures_before_success: failures
                    .iter()
                    .map(|(id, n)| (id.to_string(), *n))
                    .collect(),
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn calls(&self, id: &str) -> usize {
            self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ManifestSource for FlakySource {
        async fn fetch_manifest(&self, id: &str, _key: &str) -> CompileResult<RemoteManifest> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(id.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            tokio::task::yield_now().await;
            let failures = self.failures_before_success.get(id).copied().unwrap_or(0);
            if call <= failures {
                return Err(CompileError::Network {
                    message: format!("attempt {call} failed"),
                });
            }
            Ok(RemoteManifest {
                title: id.to_string(),
                author: "a".to_string(),
                cover: StickerRef { id: 0, emoji: None },
                stickers: Vec::new(),
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        successes: Mutex<Vec<String>>,
        failures: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FetchHandler for Recorder {
        type Output = Result<String, String>;

        async fn on_success(&self, task: FetchTask, manifest: RemoteManifest) -> Self::Output {
            self.successes.lock().unwrap().push(task.id.clone());
            Ok(manifest.title)
        }

        async fn on_failure(&self, task: FetchTask, _error: CompileError) -> Self::Output {
            self.failures.lock().unwrap().push(task.id.clone());
            Err(task.id)
        }
    }

    fn config(retries: u32) -> DispatchConfig {
        DispatchConfig::default()
            .with_retries(retries)
            .with_base_backoff(Duration::ZERO)
    }

    #[tokio::test]
    async fn each_task_completes_exactly_once() {
        let source = Arc::new(FlakySource::new(&[("B", 10)]));
        let dispatcher = FetchDispatcher::new(source.clone(), config(2));
        let handler = Arc::new(Recorder::default());

        let tasks = ["A", "B", "C"]
            .iter()
            .map(|id| FetchTask::new(*id, "k"))
            .collect();
        let outputs = dispatcher.run(tasks, handler.clone()).await;

        assert_eq!(outputs.len(), 3);
        let mut successes = handler.successes.lock().unwrap().clone();
        successes.sort();
        assert_eq!(successes, ["A", "C"]);
        assert_eq!(*handler.failures.lock().unwrap(), ["B"]);
        assert_eq!(source.calls("B"), 3);
        assert_eq!(source.calls("A"), 1);
    }

    #[tokio::test]
    async fn retries_until_budget_is_spent() {
        let source = Arc::new(FlakySource::new(&[("ok", 2), ("dropped", 3)]));
        let dispatcher = FetchDispatcher::new(source.clone(), config(2));
        let handler = Arc::new(Recorder::default());

        let outputs = dispatcher
            .run(
                vec![FetchTask::new("ok", "k"), FetchTask::new("dropped", "k")],
                handler,
            )
            .await;

        assert!(outputs.contains(&Ok("ok".to_string())));
        assert!(outputs.contains(&Err("dropped".to_string())));
        assert_eq!(source.calls("ok"), 3);
        assert_eq!(source.calls("dropped"), 3);
    }

    #[tokio::test]
    async fn progress_reports_every_task() {
        let source = Arc::new(FlakySource::new(&[]));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let dispatcher = FetchDispatcher::new(source, config(0)).with_progress(Arc::new(
            move |event: ProgressEvent| sink_events.lock().unwrap().push(event),
        ));

        let tasks = (0..5).map(|i| FetchTask::new(i.to_string(), "k")).collect();
        dispatcher.run(tasks, Arc::new(Recorder::default())).await;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| e.total == 5));
        let mut done: Vec<_> = events.iter().map(|e| e.done).collect();
        done.sort();
        assert_eq!(done, [1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn progress_accumulates_across_runs() {
        let source = Arc::new(FlakySource::new(&[]));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let dispatcher = FetchDispatcher::new(source, config(0)).with_progress(Arc::new(
            move |event: ProgressEvent| sink_events.lock().unwrap().push(event),
        ));

        let handler = Arc::new(Recorder::default());
        dispatcher
            .run(vec![FetchTask::new("A", "k"), FetchTask::new("B", "k")], handler.clone())
            .await;
        dispatcher
            .run(vec![FetchTask::new("C", "k")], handler)
            .await;

        let events = events.lock().unwrap();
        assert_eq!(events.last(), Some(&ProgressEvent { done: 3, total: 3 }));
    }

    #[tokio::test]
    async fn empty_task_list() {
        let dispatcher = FetchDispatcher::new(Arc::new(FlakySource::new(&[])), config(2));
        let outputs = dispatcher
            .run(Vec::new(), Arc::new(Recorder::default()))
            .await;
        assert!(outputs.is_empty());
        assert_eq!(dispatcher.peak_in_flight(), 0);
    }

    /// Sleeps on every fetch and records how many calls overlap.
    #[derive(Default)]
    struct SlowSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ManifestSource for SlowSource {
        async fn fetch_manifest(&self, id: &str, _key: &str) -> CompileResult<RemoteManifest> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(RemoteManifest {
                title: id.to_string(),
                author: "a".to_string(),
                cover: StickerRef { id: 0, emoji: None },
                stickers: Vec::new(),
            })
        }
    }

    /// Panics for `bad`, answers everything else; rejects `badkey` keys.
    struct MisbehavingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ManifestSource for MisbehavingSource {
        async fn fetch_manifest(&self, id: &str, key: &str) -> CompileResult<RemoteManifest> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if id == "bad" {
                panic!("source bug");
            }
            if key == "badkey" {
                return Err(CompileError::InvalidKey {
                    id: id.to_string(),
                    message: "not a valid header value".to_string(),
                });
            }
            Ok(RemoteManifest {
                title: id.to_string(),
                author: "a".to_string(),
                cover: StickerRef { id: 0, emoji: None },
                stickers: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn bound_is_shared_by_overlapping_runs() {
        let source = Arc::new(SlowSource::default());
        let dispatcher = FetchDispatcher::new(source.clone(), config(0).with_concurrency(2));
        let handler = Arc::new(Recorder::default());

        let runs = (0..5).map(|batch| {
            let tasks = (0..2)
                .map(|i| FetchTask::new(format!("{batch}-{i}"), "k"))
                .collect();
            dispatcher.run(tasks, handler.clone())
        });
        let outputs = futures::future::join_all(runs).await;

        assert_eq!(outputs.iter().map(Vec::len).sum::<usize>(), 10);
        assert_eq!(handler.successes.lock().unwrap().len(), 10);
        assert!(dispatcher.peak_in_flight() <= 2, "{}", dispatcher.peak_in_flight());
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panicking_fetch_is_reported_as_failure() {
        let source = Arc::new(MisbehavingSource {
            calls: AtomicUsize::new(0),
        });
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let dispatcher = FetchDispatcher::new(source, config(2)).with_progress(Arc::new(
            move |event: ProgressEvent| sink_events.lock().unwrap().push(event),
        ));
        let handler = Arc::new(Recorder::default());

        let outputs = dispatcher
            .run(
                vec![FetchTask::new("good", "k"), FetchTask::new("bad", "k")],
                handler.clone(),
            )
            .await;

        assert_eq!(outputs.len(), 2);
        assert!(outputs.contains(&Err("bad".to_string())));
        assert_eq!(*handler.failures.lock().unwrap(), ["bad"]);
        assert_eq!(*handler.successes.lock().unwrap(), ["good"]);
        assert_eq!(events.lock().unwrap().len(), 2);

        // The permit and in-flight slot of the panicked task were released.
        dispatcher
            .run(vec![FetchTask::new("after", "k")], handler.clone())
            .await;
        assert!(handler.successes.lock().unwrap().contains(&"after".to_string()));
    }

    #[tokio::test]
    async fn invalid_key_is_not_retried() {
        let source = Arc::new(MisbehavingSource {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = FetchDispatcher::new(source.clone(), config(2));
        let handler = Arc::new(Recorder::default());

        dispatcher
            .run(vec![FetchTask::new("p", "badkey")], handler.clone())
            .await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*handler.failures.lock().unwrap(), ["p"]);
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let cfg = DispatchConfig::default();
        let err = CompileError::Network {
            message: "x".into(),
        };
        for attempt in 1..=10 {
            let d = backoff_for(&err, attempt, &cfg);
            assert!(d <= cfg.max_backoff, "attempt {attempt}: {d:?}");
            assert!(d >= Duration::from_millis(10));
        }
    }

    #[test]
    fn backoff_honours_retry_after() {
        let cfg = DispatchConfig::default();
        let err = CompileError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        let d = backoff_for(&err, 1, &cfg);
        assert!(d >= Duration::from_millis(1800) && d <= Duration::from_millis(2200));

        let err = CompileError::RateLimited {
            retry_after: Some(Duration::from_secs(600)),
        };
        assert!(backoff_for(&err, 1, &cfg) <= Duration::from_millis(33_000));
    }

    #[test]
    fn zero_base_backoff_never_sleeps() {
        let cfg = config(2);
        let err = CompileError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(backoff_for(&err, 1, &cfg), Duration::ZERO);
    }
}
