// Shared test helpers

#![allow(dead_code)]

use netpulse::buffer::SampleBuffer;
use netpulse::config::AlertConfig;
use netpulse::lifecycle_store::LifecycleStore;
use netpulse::metrics_repo::MetricsRepo;
use netpulse::models::*;
use std::sync::Arc;

/// MetricsRepo + buffer + lifecycle store over one tempfile SQLite database.
pub async fn stores(dir: &tempfile::TempDir) -> (Arc<MetricsRepo>, Arc<SampleBuffer>, Arc<LifecycleStore>) {
    let path = dir.path().join("telemetry.db");
    let repo = Arc::new(
        MetricsRepo::connect(path.to_str().unwrap(), 4, 30)
            .await
            .unwrap(),
    );
    repo.init().await.unwrap();
    let buffer = Arc::new(SampleBuffer::new(repo.pool().clone()));
    buffer.init().await.unwrap();
    let lifecycle = Arc::new(LifecycleStore::new(repo.pool().clone()));
    lifecycle.init().await.unwrap();
    (repo, buffer, lifecycle)
}

pub fn sample(producer_id: &str, sequence_id: u64, timestamp: i64) -> Sample {
    Sample {
        room_id: "room-1".into(),
        participant_id: "alice".into(),
        producer_id: producer_id.into(),
        sequence_id,
        protocol: Protocol::Webrtc,
        timestamp,
        upload_bitrate_kbps: 400.0,
        download_bitrate_kbps: 600.0,
        latency_ms: 50.0,
        packet_loss_pct: 0.5,
        using_relay: false,
    }
}

pub fn default_alert_config() -> AlertConfig {
    AlertConfig {
        threshold_ceiling_kbps: 10_000.0,
        critical_factor: 2.0,
        spike_factor: 3.0,
        baseline_alpha: 0.3,
        packet_loss_pct: 5.0,
        latency_ms: 400.0,
    }
}
