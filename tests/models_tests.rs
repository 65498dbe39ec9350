// Model serde and validation tests

mod common;

use netpulse::models::*;

#[test]
fn sample_serializes_camel_case_with_lowercase_protocol() {
    let sample = common::sample("edge-1", 7, 1_700_000_000_000);
    let json = serde_json::to_value(&sample).unwrap();
    assert_eq!(json["roomId"], "room-1");
    assert_eq!(json["participantId"], "alice");
    assert_eq!(json["producerId"], "edge-1");
    assert_eq!(json["sequenceId"], 7);
    assert_eq!(json["protocol"], "webrtc");
    assert_eq!(json["uploadBitrateKbps"], 400.0);
    assert_eq!(json["usingRelay"], false);
}

#[test]
fn sample_deserializes_without_using_relay() {
    let json = r#"{
        "roomId": "room-9",
        "participantId": "bob",
        "producerId": "edge-2",
        "sequenceId": 1,
        "protocol": "http",
        "timestamp": 1700000000000,
        "uploadBitrateKbps": 100.0,
        "downloadBitrateKbps": 200.0,
        "latencyMs": 30.0,
        "packetLossPct": 0.0
    }"#;
    let sample: Sample = serde_json::from_str(json).unwrap();
    assert_eq!(sample.protocol, Protocol::Http);
    assert!(!sample.using_relay);
    assert_eq!(sample.bandwidth_kbps(), 300.0);
}

#[test]
fn sample_validate_accepts_good_sample() {
    assert!(common::sample("edge-1", 1, 1_700_000_000_000).validate().is_ok());
}

#[test]
fn sample_validate_rejects_out_of_range_packet_loss() {
    let mut sample = common::sample("edge-1", 1, 1_700_000_000_000);
    sample.packet_loss_pct = 150.0;
    assert!(sample.validate().is_err());
}

#[test]
fn sample_validate_rejects_negative_bitrate() {
    let mut sample = common::sample("edge-1", 1, 1_700_000_000_000);
    sample.download_bitrate_kbps = -1.0;
    assert!(sample.validate().is_err());
}

#[test]
fn sample_validate_rejects_empty_room() {
    let mut sample = common::sample("edge-1", 1, 1_700_000_000_000);
    sample.room_id = String::new();
    assert!(sample.validate().is_err());
}

#[test]
fn severity_ordering_low_to_critical() {
    assert!(Severity::Low < Severity::Medium);
    assert!(Severity::Medium < Severity::High);
    assert!(Severity::High < Severity::Critical);
}

#[test]
fn severity_and_alert_type_parse_roundtrip() {
    for s in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
        assert_eq!(Severity::parse(s.as_str()), Some(s));
    }
    for t in [AlertType::Threshold, AlertType::Spike, AlertType::Anomaly] {
        assert_eq!(AlertType::parse(t.as_str()), Some(t));
    }
    assert_eq!(Severity::parse("fatal"), None);
    assert_eq!(Protocol::parse("quic"), None);
}

#[test]
fn snapshot_staleness_respects_ttl() {
    let sample = common::sample("edge-1", 1, 1_700_000_000_000);
    let snapshot = RealtimeSnapshot::from_sample(&sample, 1_000_000);
    assert!(!snapshot.is_stale(1_050_000, 60_000));
    assert!(!snapshot.is_stale(1_060_000, 60_000));
    assert!(snapshot.is_stale(1_060_001, 60_000));
}
