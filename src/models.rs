// Domain models shared across the pipeline

use serde::{Deserialize, Serialize};

/// Transport the sample was measured over; serializes to lowercase JSON (e.g. "webrtc").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Webrtc,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Webrtc => "webrtc",
        }
    }

    /// Parse from a stored column value (e.g. "http", "webrtc").
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Protocol::Http),
            "webrtc" => Some(Protocol::Webrtc),
            _ => None,
        }
    }
}

/// Alert severity, ordered Low < Medium < High < Critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Threshold,
    Spike,
    Anomaly,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Threshold => "threshold",
            AlertType::Spike => "spike",
            AlertType::Anomaly => "anomaly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "threshold" => Some(AlertType::Threshold),
            "spike" => Some(AlertType::Spike),
            "anomaly" => Some(AlertType::Anomaly),
            _ => None,
        }
    }
}

/// One raw network-quality measurement for a participant in a room.
/// Immutable once enqueued. `producer_id` + `sequence_id` identify it for
/// duplicate suppression on redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub room_id: String,
    pub participant_id: String,
    pub producer_id: String,
    pub sequence_id: u64,
    pub protocol: Protocol,
    /// Producer-side measurement time, epoch millis.
    pub timestamp: i64,
    pub upload_bitrate_kbps: f64,
    pub download_bitrate_kbps: f64,
    pub latency_ms: f64,
    pub packet_loss_pct: f64,
    #[serde(default)]
    pub using_relay: bool,
}

impl Sample {
    /// Combined bandwidth used for totals, peaks, and threshold checks.
    pub fn bandwidth_kbps(&self) -> f64 {
        self.upload_bitrate_kbps + self.download_bitrate_kbps
    }

    /// Schema/range validation. Violations are skipped by the processor, never retried.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.room_id.is_empty() {
            return Err("empty roomId");
        }
        if self.participant_id.is_empty() {
            return Err("empty participantId");
        }
        if self.producer_id.is_empty() {
            return Err("empty producerId");
        }
        if self.timestamp <= 0 {
            return Err("non-positive timestamp");
        }
        if !self.upload_bitrate_kbps.is_finite() || self.upload_bitrate_kbps < 0.0 {
            return Err("uploadBitrateKbps out of range");
        }
        if !self.download_bitrate_kbps.is_finite() || self.download_bitrate_kbps < 0.0 {
            return Err("downloadBitrateKbps out of range");
        }
        if !self.latency_ms.is_finite() || self.latency_ms < 0.0 {
            return Err("latencyMs out of range");
        }
        if !self.packet_loss_pct.is_finite()
            || self.packet_loss_pct < 0.0
            || self.packet_loss_pct > 100.0
        {
            return Err("packetLossPct out of range");
        }
        Ok(())
    }
}

/// Latest known metrics for one (room, participant) pair. Overwritten in place;
/// entries past the TTL are excluded from active views but not eagerly deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeSnapshot {
    pub room_id: String,
    pub participant_id: String,
    pub protocol: Protocol,
    pub upload_bitrate_kbps: f64,
    pub download_bitrate_kbps: f64,
    pub latency_ms: f64,
    pub packet_loss_pct: f64,
    pub using_relay: bool,
    /// Epoch millis of the last sample applied.
    pub last_updated: i64,
}

impl RealtimeSnapshot {
    pub fn from_sample(sample: &Sample, now_ms: i64) -> Self {
        RealtimeSnapshot {
            room_id: sample.room_id.clone(),
            participant_id: sample.participant_id.clone(),
            protocol: sample.protocol,
            upload_bitrate_kbps: sample.upload_bitrate_kbps,
            download_bitrate_kbps: sample.download_bitrate_kbps,
            latency_ms: sample.latency_ms,
            packet_loss_pct: sample.packet_loss_pct,
            using_relay: sample.using_relay,
            last_updated: now_ms,
        }
    }

    pub fn is_stale(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.last_updated > ttl_ms
    }
}

/// Finalized hourly rollup; exactly one row per (bucket_start, protocol).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsHourly {
    pub bucket_start: i64,
    pub protocol: Protocol,
    pub total_bandwidth_kbps: f64,
    pub total_requests: i64,
    pub avg_response_time_ms: f64,
    pub peak_bandwidth_kbps: f64,
    /// Timestamp of the sample that set the peak.
    pub peak_hour: i64,
    pub unique_users: i64,
}

/// Finalized daily rollup, re-aggregated from the day's hourly rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsDaily {
    pub day_start: i64,
    pub protocol: Protocol,
    pub total_bandwidth_kbps: f64,
    pub total_requests: i64,
    pub avg_response_time_ms: f64,
    pub peak_bandwidth_kbps: f64,
    pub peak_hour: i64,
    pub unique_users: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandwidthAlert {
    pub id: i64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub metric_value: f64,
    pub threshold_value: Option<f64>,
    pub endpoint: Option<String>,
    pub protocol: Option<Protocol>,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

/// Externally-sourced room/participant lifecycle event, kept for correlation
/// and debugging. Written once; only `processed`/`error_message` change after.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub id: i64,
    pub event: String,
    pub room_name: Option<String>,
    pub participant_identity: Option<String>,
    pub event_data: serde_json::Value,
    #[serde(default)]
    pub is_test_event: bool,
    pub processed: bool,
    pub error_message: Option<String>,
    pub created_at: i64,
}

/// Operational health view for GET /api/status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusView {
    pub buffer_depth: i64,
    pub last_drain_ms: Option<i64>,
    pub drain_in_progress: bool,
    pub samples_processed: u64,
    pub duplicates_suppressed: u64,
    pub malformed_skipped: u64,
}
