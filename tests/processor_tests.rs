// End-to-end processor ticks over a real SQLite database

mod common;

use netpulse::aggregator::MS_PER_HOUR;
use netpulse::processor::{PipelineStatus, Processor, ProcessorConfig, ProcessorDeps};
use netpulse::snapshot_store::SnapshotStore;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::broadcast;

const HOUR0: i64 = 1_700_000_000_000 / MS_PER_HOUR * MS_PER_HOUR;

struct Harness {
    processor: Processor,
    repo: Arc<netpulse::metrics_repo::MetricsRepo>,
    buffer: Arc<netpulse::buffer::SampleBuffer>,
    snapshots: Arc<SnapshotStore>,
    status: Arc<PipelineStatus>,
    snapshot_rx: broadcast::Receiver<Vec<netpulse::models::RealtimeSnapshot>>,
}

async fn harness(dir: &TempDir) -> Harness {
    let (repo, buffer, _lifecycle) = common::stores(dir).await;
    let snapshots = Arc::new(SnapshotStore::new(60_000));
    let status = Arc::new(PipelineStatus::new());
    let (snapshot_tx, snapshot_rx) = broadcast::channel(8);
    let deps = ProcessorDeps {
        buffer: buffer.clone(),
        snapshots: snapshots.clone(),
        metrics_repo: repo.clone(),
        status: status.clone(),
        snapshot_tx,
    };
    let config = ProcessorConfig {
        drain_interval_secs: 5,
        max_batch_size: 500,
        tick_deadline_ms: 4_500,
        dedupe_window_secs: 60,
        stats_log_interval_secs: 60,
        alerts: common::default_alert_config(),
    };
    Harness {
        processor: Processor::new(deps, config),
        repo,
        buffer,
        snapshots,
        status,
        snapshot_rx,
    }
}

#[tokio::test]
async fn tick_drains_updates_snapshots_and_broadcasts() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(&dir).await;

    for seq in 0..3 {
        let mut s = common::sample("edge-1", seq, HOUR0 + 1000);
        s.participant_id = format!("p{}", seq);
        h.buffer.enqueue(&s).await.unwrap();
    }

    let stats = h.processor.run_one_tick(HOUR0 + 5_000).await.unwrap();
    assert_eq!(stats.drained, 3);
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.duplicates, 0);
    assert_eq!(stats.malformed, 0);
    // The hour is still open, nothing finalized yet.
    assert_eq!(stats.buckets_finalized, 0);

    assert_eq!(h.buffer.depth().await.unwrap(), 0);
    let active = h.snapshots.active(HOUR0 + 5_000, None).await;
    assert_eq!(active.len(), 3);

    let broadcasted = h.snapshot_rx.recv().await.unwrap();
    assert_eq!(broadcasted.len(), 3);

    let view = h.status.view(0);
    assert_eq!(view.samples_processed, 3);
}

#[tokio::test]
async fn closed_hour_is_persisted_during_tick() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(&dir).await;

    h.buffer
        .enqueue(&common::sample("edge-1", 1, HOUR0 + 1000))
        .await
        .unwrap();
    h.buffer
        .enqueue(&common::sample("edge-1", 2, HOUR0 + 2000))
        .await
        .unwrap();

    // Tick runs after the hour boundary, so the bucket folds and finalizes
    // within the same cycle.
    let stats = h
        .processor
        .run_one_tick(HOUR0 + MS_PER_HOUR + 1)
        .await
        .unwrap();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.buckets_finalized, 1);

    let rows = h
        .repo
        .get_hourly_range(HOUR0, HOUR0 + MS_PER_HOUR)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].total_requests, 2);
    assert_eq!(rows[0].total_bandwidth_kbps, 2000.0);
}

#[tokio::test]
async fn redelivered_batch_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(&dir).await;

    let batch: Vec<_> = (0..4)
        .map(|seq| common::sample("edge-1", seq, HOUR0 + 1000))
        .collect();
    for s in &batch {
        h.buffer.enqueue(s).await.unwrap();
    }
    let first = h.processor.run_one_tick(HOUR0 + 5_000).await.unwrap();
    assert_eq!(first.processed, 4);

    // Same (producerId, sequenceId) pairs delivered again inside the window.
    for s in &batch {
        h.buffer.enqueue(s).await.unwrap();
    }
    let second = h.processor.run_one_tick(HOUR0 + 10_000).await.unwrap();
    assert_eq!(second.drained, 4);
    assert_eq!(second.duplicates, 4);
    assert_eq!(second.processed, 0);

    // Finalize and check the hourly totals were counted exactly once.
    let stats = h
        .processor
        .run_one_tick(HOUR0 + MS_PER_HOUR)
        .await
        .unwrap();
    assert_eq!(stats.buckets_finalized, 1);
    let rows = h
        .repo
        .get_hourly_range(HOUR0, HOUR0 + MS_PER_HOUR)
        .await
        .unwrap();
    assert_eq!(rows[0].total_requests, 4);

    let view = h.status.view(0);
    assert_eq!(view.duplicates_suppressed, 4);
}

#[tokio::test]
async fn malformed_sample_does_not_abort_the_batch() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(&dir).await;

    h.buffer
        .enqueue(&common::sample("edge-1", 1, HOUR0 + 1000))
        .await
        .unwrap();
    let mut bad = common::sample("edge-1", 2, HOUR0 + 1000);
    bad.packet_loss_pct = 400.0;
    h.buffer.enqueue(&bad).await.unwrap();
    h.buffer
        .enqueue(&common::sample("edge-1", 3, HOUR0 + 2000))
        .await
        .unwrap();

    let stats = h.processor.run_one_tick(HOUR0 + 5_000).await.unwrap();
    assert_eq!(stats.drained, 3);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.processed, 2);
    assert_eq!(h.status.view(0).malformed_skipped, 1);
}

#[tokio::test]
async fn empty_tick_still_flushes_closed_buckets() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(&dir).await;

    h.buffer
        .enqueue(&common::sample("edge-1", 1, HOUR0 + 1000))
        .await
        .unwrap();
    h.processor.run_one_tick(HOUR0 + 5_000).await.unwrap();

    // Quiet period; the hour closes with no new traffic.
    let stats = h
        .processor
        .run_one_tick(HOUR0 + MS_PER_HOUR + 5_000)
        .await
        .unwrap();
    assert_eq!(stats.drained, 0);
    assert_eq!(stats.buckets_finalized, 1);
}

#[tokio::test]
async fn quiet_tick_clears_anomaly_streak() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(&dir).await;

    let mut lossy = common::sample("edge-1", 1, HOUR0 + 1000);
    lossy.packet_loss_pct = 12.0;
    h.buffer.enqueue(&lossy).await.unwrap();
    h.processor.run_one_tick(HOUR0 + 5_000).await.unwrap();

    // Nothing arrives on the next tick; the streak must not survive it.
    let quiet = h.processor.run_one_tick(HOUR0 + 10_000).await.unwrap();
    assert_eq!(quiet.drained, 0);

    lossy.sequence_id = 2;
    h.buffer.enqueue(&lossy).await.unwrap();
    h.processor.run_one_tick(HOUR0 + 15_000).await.unwrap();

    let alerts = h.repo.unresolved_alerts(None).await.unwrap();
    assert!(
        alerts
            .iter()
            .all(|a| a.alert_type != netpulse::models::AlertType::Anomaly),
        "anomaly fired despite a clean tick between strikes"
    );
}

#[tokio::test]
async fn all_duplicate_tick_clears_anomaly_streak() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(&dir).await;

    let mut lossy = common::sample("edge-1", 1, HOUR0 + 1000);
    lossy.packet_loss_pct = 12.0;
    h.buffer.enqueue(&lossy).await.unwrap();
    h.processor.run_one_tick(HOUR0 + 5_000).await.unwrap();

    // A tick whose whole batch is suppressed as duplicates is also clean.
    h.buffer.enqueue(&lossy).await.unwrap();
    let dup = h.processor.run_one_tick(HOUR0 + 10_000).await.unwrap();
    assert_eq!(dup.processed, 0);
    assert_eq!(dup.duplicates, 1);

    lossy.sequence_id = 2;
    h.buffer.enqueue(&lossy).await.unwrap();
    h.processor.run_one_tick(HOUR0 + 15_000).await.unwrap();

    let alerts = h.repo.unresolved_alerts(None).await.unwrap();
    assert!(
        alerts
            .iter()
            .all(|a| a.alert_type != netpulse::models::AlertType::Anomaly)
    );
}

#[tokio::test]
async fn spawned_loop_records_successful_drain_time() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir).await;

    assert_eq!(
        h.status.last_drain_ms.load(std::sync::atomic::Ordering::Relaxed),
        0
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = netpulse::processor::spawn(h.processor, shutdown_rx);

    // The first drain tick fires immediately on spawn.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert!(
        h.status.last_drain_ms.load(std::sync::atomic::Ordering::Relaxed) > 0,
        "completed drain did not record a timestamp"
    );
    assert!(
        !h.status
            .drain_in_progress
            .load(std::sync::atomic::Ordering::Relaxed)
    );

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn alert_drafts_reach_the_database() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(&dir).await;

    let mut hot = common::sample("edge-1", 1, HOUR0 + 1000);
    hot.upload_bitrate_kbps = 50_000.0;
    h.buffer.enqueue(&hot).await.unwrap();

    let stats = h.processor.run_one_tick(HOUR0 + 5_000).await.unwrap();
    assert!(stats.alerts_upserted >= 1);

    let alerts = h.repo.unresolved_alerts(None).await.unwrap();
    assert!(
        alerts
            .iter()
            .any(|a| a.alert_type == netpulse::models::AlertType::Threshold
                && a.severity == netpulse::models::Severity::Critical)
    );
}
