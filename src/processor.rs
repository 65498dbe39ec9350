// Batch scheduler + buffer processor. A single periodic task drains the
// sample buffer, dedupes, updates snapshots, folds hourly buckets, evaluates
// alerts, and finalizes closed buckets. Ticks run inline in one task, so the
// in-memory bucket state has exactly one writer; the drain_in_progress flag
// guards against overlap and feeds the status endpoint.

use crate::aggregator::Aggregator;
use crate::alerts::AlertEvaluator;
use crate::buffer::SampleBuffer;
use crate::config::AlertConfig;
use crate::metrics_repo::MetricsRepo;
use crate::models::{MetricsHourly, PipelineStatusView, RealtimeSnapshot};
use crate::snapshot_store::SnapshotStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant, interval, timeout};

/// Rate limit for "no receivers" logging (avoid logging every tick when no one
/// is on /ws/snapshots).
const NO_RECEIVERS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// In-tick persistence retries (exponential backoff, base doubling each try).
const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BACKOFF: Duration = Duration::from_millis(100);

/// A closed bucket that keeps failing to persist is carried across this many
/// ticks before being dropped (logged as data loss) to bound memory.
const PENDING_TICKS_CAP: u32 = 5;

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "get_timestamp", "system time error");
            0
        })
}

/// Shared operational state for GET /api/status and the stats log.
#[derive(Default)]
pub struct PipelineStatus {
    pub drain_in_progress: AtomicBool,
    /// Epoch millis of the last completed drain; 0 = never.
    pub last_drain_ms: AtomicI64,
    pub samples_processed: AtomicU64,
    pub duplicates_suppressed: AtomicU64,
    pub malformed_skipped: AtomicU64,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self, buffer_depth: i64) -> PipelineStatusView {
        let last = self.last_drain_ms.load(Ordering::Relaxed);
        PipelineStatusView {
            buffer_depth,
            last_drain_ms: (last > 0).then_some(last),
            drain_in_progress: self.drain_in_progress.load(Ordering::Relaxed),
            samples_processed: self.samples_processed.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            malformed_skipped: self.malformed_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Stores, channels, and shared status for the processor.
pub struct ProcessorDeps {
    pub buffer: Arc<SampleBuffer>,
    pub snapshots: Arc<SnapshotStore>,
    pub metrics_repo: Arc<MetricsRepo>,
    pub status: Arc<PipelineStatus>,
    pub snapshot_tx: broadcast::Sender<Vec<RealtimeSnapshot>>,
}

/// Processor timing and sizing config.
pub struct ProcessorConfig {
    pub drain_interval_secs: u64,
    pub max_batch_size: u32,
    pub tick_deadline_ms: u64,
    pub dedupe_window_secs: u64,
    /// How often to log app stats (real seconds).
    pub stats_log_interval_secs: u64,
    pub alerts: AlertConfig,
}

/// Outcome of one processing tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub drained: usize,
    pub processed: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub buckets_finalized: usize,
    pub alerts_upserted: usize,
}

/// Time-bounded seen-set for (producerId, sequenceId) redelivery suppression.
struct DedupeSet {
    window_ms: i64,
    seen: HashMap<(String, u64), i64>,
}

impl DedupeSet {
    fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            seen: HashMap::new(),
        }
    }

    /// Returns false when the pair was already seen inside the window.
    fn insert(&mut self, producer_id: &str, sequence_id: u64, now_ms: i64) -> bool {
        let key = (producer_id.to_string(), sequence_id);
        match self.seen.get(&key) {
            Some(_) => false,
            None => {
                self.seen.insert(key, now_ms);
                true
            }
        }
    }

    fn prune(&mut self, now_ms: i64) {
        let window_ms = self.window_ms;
        self.seen.retain(|_, at| now_ms - *at <= window_ms);
    }
}

struct PendingBucket {
    row: MetricsHourly,
    retry_ticks: u32,
}

/// Owns all per-tick mutable state (buckets, baselines, dedupe, unflushed
/// finalized rows). Driven by `spawn` in production and directly in tests.
pub struct Processor {
    deps: ProcessorDeps,
    config: ProcessorConfig,
    aggregator: Aggregator,
    evaluator: AlertEvaluator,
    dedupe: DedupeSet,
    pending: Vec<PendingBucket>,
    last_no_receivers_log: Option<Instant>,
}

impl Processor {
    pub fn new(deps: ProcessorDeps, config: ProcessorConfig) -> Self {
        let evaluator = AlertEvaluator::new(config.alerts.clone());
        let dedupe = DedupeSet::new(config.dedupe_window_secs as i64 * 1000);
        Self {
            deps,
            config,
            aggregator: Aggregator::new(),
            evaluator,
            dedupe,
            pending: Vec::new(),
            last_no_receivers_log: None,
        }
    }

    pub fn evaluator_mut(&mut self) -> &mut AlertEvaluator {
        &mut self.evaluator
    }

    /// One drain-process cycle. A malformed sample never aborts the batch; a
    /// failed finalize write is retried and then carried to the next tick.
    pub async fn run_one_tick(&mut self, now_ms: i64) -> anyhow::Result<TickStats> {
        let mut stats = TickStats::default();

        let batch = self.deps.buffer.drain(self.config.max_batch_size).await?;
        stats.drained = batch.len();
        if batch.is_empty() {
            // A no-op tick still counts as a tick for the anomaly rule
            // (streaks require consecutive offending ticks), and buckets whose
            // hour closed while traffic was quiet (plus pending retries) still
            // get flushed.
            self.evaluator.evaluate(&[]);
            stats.buckets_finalized = self.finalize_closed(now_ms).await;
            return Ok(stats);
        }

        let mut surviving = Vec::with_capacity(batch.len());
        let mut refreshed = Vec::with_capacity(batch.len());
        for sample in batch {
            if !self
                .dedupe
                .insert(&sample.producer_id, sample.sequence_id, now_ms)
            {
                stats.duplicates += 1;
                continue;
            }
            if let Err(reason) = sample.validate() {
                stats.malformed += 1;
                tracing::warn!(
                    reason,
                    producer_id = %sample.producer_id,
                    sequence_id = sample.sequence_id,
                    "malformed sample skipped"
                );
                continue;
            }
            refreshed.push(self.deps.snapshots.upsert(&sample, now_ms).await);
            self.aggregator.fold(&sample);
            surviving.push(sample);
        }
        stats.processed = surviving.len();

        // Runs even when nothing survived: an all-duplicate tick is still a
        // clean tick for the anomaly streak rule.
        let drafts = self.evaluator.evaluate(&surviving);
        for draft in &drafts {
            if self.upsert_alert_with_retry(draft, now_ms).await {
                stats.alerts_upserted += 1;
            }
        }

        if !refreshed.is_empty() && self.deps.snapshot_tx.send(refreshed).is_err() {
            let should_log = self
                .last_no_receivers_log
                .is_none_or(|t| t.elapsed() >= NO_RECEIVERS_LOG_INTERVAL);
            if should_log {
                tracing::debug!(
                    operation = "broadcast_snapshots",
                    "No active WebSocket clients; broadcast channel has no receivers"
                );
                self.last_no_receivers_log = Some(Instant::now());
            }
        }

        stats.buckets_finalized = self.finalize_closed(now_ms).await;
        self.dedupe.prune(now_ms);

        let status = &self.deps.status;
        status
            .samples_processed
            .fetch_add(stats.processed as u64, Ordering::Relaxed);
        status
            .duplicates_suppressed
            .fetch_add(stats.duplicates as u64, Ordering::Relaxed);
        status
            .malformed_skipped
            .fetch_add(stats.malformed as u64, Ordering::Relaxed);

        Ok(stats)
    }

    /// Moves closed buckets into the pending list and tries to persist
    /// everything pending. Returns how many rows were written.
    async fn finalize_closed(&mut self, now_ms: i64) -> usize {
        for row in self.aggregator.take_closed(now_ms) {
            self.pending.push(PendingBucket {
                row,
                retry_ticks: 0,
            });
        }

        let mut written = 0;
        let mut keep = Vec::new();
        for mut pending in self.pending.drain(..) {
            if Self::save_hourly_with_retry(&self.deps.metrics_repo, &pending.row).await {
                written += 1;
                continue;
            }
            pending.retry_ticks += 1;
            if pending.retry_ticks > PENDING_TICKS_CAP {
                tracing::error!(
                    bucket_start = pending.row.bucket_start,
                    protocol = pending.row.protocol.as_str(),
                    total_requests = pending.row.total_requests,
                    retry_ticks = pending.retry_ticks,
                    "dropping unpersistable hourly bucket (data loss)"
                );
            } else {
                keep.push(pending);
            }
        }
        self.pending = keep;
        written
    }

    async fn save_hourly_with_retry(repo: &MetricsRepo, row: &MetricsHourly) -> bool {
        let mut backoff = PERSIST_BACKOFF;
        for attempt in 1..=PERSIST_ATTEMPTS {
            match repo.save_hourly(row).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt,
                        bucket_start = row.bucket_start,
                        "save_hourly failed"
                    );
                    if attempt < PERSIST_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        false
    }

    async fn upsert_alert_with_retry(
        &self,
        draft: &crate::alerts::AlertDraft,
        now_ms: i64,
    ) -> bool {
        let mut backoff = PERSIST_BACKOFF;
        for attempt in 1..=PERSIST_ATTEMPTS {
            match self.deps.metrics_repo.upsert_alert(draft, now_ms).await {
                Ok(_) => return true,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt,
                        alert_type = draft.alert_type.as_str(),
                        "upsert_alert failed"
                    );
                    if attempt < PERSIST_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        false
    }
}

/// Spawns the processor loop: a drain tick on the configured cadence (skipped
/// with a warning if the previous drain is somehow still marked in progress),
/// a stats log tick, and shutdown via oneshot. On shutdown, one last attempt
/// is made to flush pending finalized buckets.
pub fn spawn(
    mut processor: Processor,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let drain_interval = Duration::from_secs(processor.config.drain_interval_secs);
        let deadline = Duration::from_millis(processor.config.tick_deadline_ms);
        let mut tick = interval(drain_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_tick = interval(Duration::from_secs(
            processor.config.stats_log_interval_secs,
        ));
        stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let status = processor.deps.status.clone();
                    if status
                        .drain_in_progress
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                    {
                        tracing::warn!(operation = "drain_tick", "previous drain still in progress, skipping tick");
                        continue;
                    }
                    let now = now_ms();
                    match timeout(deadline, processor.run_one_tick(now)).await {
                        Ok(Ok(stats)) => {
                            // Only a completed drain counts for the status
                            // endpoint's last-drain timestamp.
                            status.last_drain_ms.store(now_ms(), Ordering::Relaxed);
                            if stats.drained > 0 {
                                tracing::debug!(
                                    drained = stats.drained,
                                    processed = stats.processed,
                                    duplicates = stats.duplicates,
                                    malformed = stats.malformed,
                                    buckets_finalized = stats.buckets_finalized,
                                    alerts = stats.alerts_upserted,
                                    "drain tick complete"
                                );
                            }
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, operation = "drain_tick", "drain tick failed");
                        }
                        Err(_) => {
                            tracing::warn!(
                                deadline_ms = processor.config.tick_deadline_ms,
                                operation = "drain_tick",
                                "tick deadline exceeded, leftover work waits for next tick"
                            );
                        }
                    }
                    status.drain_in_progress.store(false, Ordering::SeqCst);
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Processor shutting down");
                    break;
                }
                _ = stats_tick.tick() => {
                    // Awaiting inside the macro would pin its temporaries
                    // across the await point and make the future !Send.
                    let snapshots_held = processor.deps.snapshots.len().await;
                    let status = &processor.deps.status;
                    tracing::info!(
                        samples_processed = status.samples_processed.load(Ordering::Relaxed),
                        duplicates_suppressed = status.duplicates_suppressed.load(Ordering::Relaxed),
                        malformed_skipped = status.malformed_skipped.load(Ordering::Relaxed),
                        open_buckets = processor.aggregator.open_buckets(),
                        snapshots_held,
                        "app stats"
                    );
                }
            }
        }

        // Flush finalized-but-unpersisted buckets before exit; open buckets
        // are intentionally left (their hour has not closed).
        let final_written = processor.finalize_closed(now_ms()).await;
        if final_written > 0 {
            tracing::debug!(buckets = final_written, "final bucket flush");
        }
    })
}
