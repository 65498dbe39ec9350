// Alert evaluator tests: threshold, spike vs baseline, anomaly streaks

mod common;

use netpulse::alerts::AlertEvaluator;
use netpulse::models::{AlertType, Protocol, Severity};

const TS: i64 = 1_700_000_000_000;

#[test]
fn threshold_far_over_ceiling_is_critical() {
    let mut evaluator = AlertEvaluator::new(common::default_alert_config());
    let mut sample = common::sample("edge-1", 1, TS);
    sample.upload_bitrate_kbps = 50_000.0;
    let drafts = evaluator.evaluate(&[sample]);
    let threshold: Vec<_> = drafts
        .iter()
        .filter(|d| d.alert_type == AlertType::Threshold)
        .collect();
    assert_eq!(threshold.len(), 1);
    assert_eq!(threshold[0].severity, Severity::Critical);
    assert_eq!(threshold[0].metric_value, 50_000.0);
    assert_eq!(threshold[0].threshold_value, Some(10_000.0));
    assert_eq!(threshold[0].endpoint.as_deref(), Some("room-1"));
}

#[test]
fn threshold_just_over_ceiling_is_high() {
    let mut evaluator = AlertEvaluator::new(common::default_alert_config());
    let mut sample = common::sample("edge-1", 1, TS);
    sample.download_bitrate_kbps = 12_000.0;
    let drafts = evaluator.evaluate(&[sample]);
    let threshold: Vec<_> = drafts
        .iter()
        .filter(|d| d.alert_type == AlertType::Threshold)
        .collect();
    assert_eq!(threshold.len(), 1);
    assert_eq!(threshold[0].severity, Severity::High);
}

#[test]
fn threshold_under_ceiling_fires_nothing() {
    let mut evaluator = AlertEvaluator::new(common::default_alert_config());
    let drafts = evaluator.evaluate(&[common::sample("edge-1", 1, TS)]);
    assert!(drafts.iter().all(|d| d.alert_type != AlertType::Threshold));
}

#[test]
fn spike_over_baseline_factor_is_medium() {
    let mut evaluator = AlertEvaluator::new(common::default_alert_config());
    evaluator.set_baseline(Protocol::Webrtc, 500.0);
    // 1600 kbps mean > 500 * 3.
    let mut sample = common::sample("edge-1", 1, TS);
    sample.upload_bitrate_kbps = 800.0;
    sample.download_bitrate_kbps = 800.0;
    let drafts = evaluator.evaluate(&[sample]);
    let spikes: Vec<_> = drafts
        .iter()
        .filter(|d| d.alert_type == AlertType::Spike)
        .collect();
    assert_eq!(spikes.len(), 1);
    assert_eq!(spikes[0].severity, Severity::Medium);
    assert_eq!(spikes[0].metric_value, 1600.0);
    assert_eq!(spikes[0].protocol, Some(Protocol::Webrtc));
}

#[test]
fn batch_under_baseline_factor_produces_no_spike() {
    let mut evaluator = AlertEvaluator::new(common::default_alert_config());
    evaluator.set_baseline(Protocol::Webrtc, 500.0);
    let mut sample = common::sample("edge-1", 1, TS);
    sample.upload_bitrate_kbps = 200.0;
    sample.download_bitrate_kbps = 250.0;
    let drafts = evaluator.evaluate(&[sample]);
    assert!(drafts.iter().all(|d| d.alert_type != AlertType::Spike));
}

#[test]
fn first_batch_seeds_baseline_without_spiking() {
    let mut evaluator = AlertEvaluator::new(common::default_alert_config());
    assert_eq!(evaluator.baseline(Protocol::Webrtc), None);
    let drafts = evaluator.evaluate(&[common::sample("edge-1", 1, TS)]);
    assert!(drafts.iter().all(|d| d.alert_type != AlertType::Spike));
    assert_eq!(evaluator.baseline(Protocol::Webrtc), Some(1000.0));
}

#[test]
fn baseline_moves_as_ema() {
    let mut evaluator = AlertEvaluator::new(common::default_alert_config());
    evaluator.set_baseline(Protocol::Webrtc, 1000.0);
    // Mean 2000, alpha 0.3: 0.3*2000 + 0.7*1000 = 1300.
    let mut sample = common::sample("edge-1", 1, TS);
    sample.upload_bitrate_kbps = 1000.0;
    sample.download_bitrate_kbps = 1000.0;
    evaluator.evaluate(&[sample]);
    assert_eq!(evaluator.baseline(Protocol::Webrtc), Some(1300.0));
}

#[test]
fn anomaly_needs_two_consecutive_ticks() {
    let mut evaluator = AlertEvaluator::new(common::default_alert_config());
    let mut lossy = common::sample("edge-1", 1, TS);
    lossy.packet_loss_pct = 12.0;

    // First strike: no alert yet.
    let drafts = evaluator.evaluate(std::slice::from_ref(&lossy));
    assert!(drafts.iter().all(|d| d.alert_type != AlertType::Anomaly));

    // Second consecutive strike fires.
    lossy.sequence_id = 2;
    let drafts = evaluator.evaluate(&[lossy]);
    let anomalies: Vec<_> = drafts
        .iter()
        .filter(|d| d.alert_type == AlertType::Anomaly)
        .collect();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].severity, Severity::High);
    assert_eq!(anomalies[0].endpoint.as_deref(), Some("room-1"));
}

#[test]
fn anomaly_streak_resets_after_clean_tick() {
    let mut evaluator = AlertEvaluator::new(common::default_alert_config());
    let mut slow = common::sample("edge-1", 1, TS);
    slow.latency_ms = 900.0;

    evaluator.evaluate(std::slice::from_ref(&slow));
    // Clean tick in between clears the streak.
    evaluator.evaluate(&[common::sample("edge-1", 2, TS)]);
    let drafts = evaluator.evaluate(&[slow]);
    assert!(drafts.iter().all(|d| d.alert_type != AlertType::Anomaly));
}

#[test]
fn threshold_and_spike_fire_independently() {
    let mut evaluator = AlertEvaluator::new(common::default_alert_config());
    evaluator.set_baseline(Protocol::Webrtc, 500.0);
    let mut sample = common::sample("edge-1", 1, TS);
    sample.upload_bitrate_kbps = 50_000.0;
    let drafts = evaluator.evaluate(&[sample]);
    assert!(drafts.iter().any(|d| d.alert_type == AlertType::Threshold));
    assert!(drafts.iter().any(|d| d.alert_type == AlertType::Spike));
}
