// Windowed aggregation: in-flight hourly buckets folded incrementally by the
// processor, plus pure daily rollup math over finalized hourly rows.
// DB access (save, range reads) stays in metrics_repo.

use crate::models::{MetricsDaily, MetricsHourly, Protocol, Sample};
use std::collections::{HashMap, HashSet};

pub const MS_PER_HOUR: i64 = 3_600_000;
pub const MS_PER_DAY: i64 = 86_400_000;

pub fn hour_start(ts_ms: i64) -> i64 {
    (ts_ms / MS_PER_HOUR) * MS_PER_HOUR
}

pub fn day_start(ts_ms: i64) -> i64 {
    (ts_ms / MS_PER_DAY) * MS_PER_DAY
}

/// In-flight rollup state for one (hour, protocol). Never read externally;
/// finalized into a MetricsHourly row when the window closes.
#[derive(Debug, Clone)]
pub struct HourlyBucket {
    pub bucket_start: i64,
    pub protocol: Protocol,
    pub total_bandwidth_kbps: f64,
    pub total_requests: i64,
    pub sum_response_time_ms: f64,
    pub peak_bandwidth_kbps: f64,
    /// Timestamp of the sample that set the peak.
    pub peak_at: i64,
    pub participants: HashSet<String>,
}

impl HourlyBucket {
    fn new(bucket_start: i64, protocol: Protocol) -> Self {
        Self {
            bucket_start,
            protocol,
            total_bandwidth_kbps: 0.0,
            total_requests: 0,
            sum_response_time_ms: 0.0,
            peak_bandwidth_kbps: 0.0,
            peak_at: bucket_start,
            participants: HashSet::new(),
        }
    }

    fn fold(&mut self, sample: &Sample) {
        let bandwidth = sample.bandwidth_kbps();
        self.total_bandwidth_kbps += bandwidth;
        self.total_requests += 1;
        self.sum_response_time_ms += sample.latency_ms;
        if bandwidth > self.peak_bandwidth_kbps {
            self.peak_bandwidth_kbps = bandwidth;
            self.peak_at = sample.timestamp;
        }
        self.participants.insert(sample.participant_id.clone());
    }

    /// Derived fields; average guards divide-by-zero by emitting 0.
    pub fn finalize(self) -> MetricsHourly {
        let avg_response_time_ms = if self.total_requests > 0 {
            self.sum_response_time_ms / self.total_requests as f64
        } else {
            0.0
        };
        MetricsHourly {
            bucket_start: self.bucket_start,
            protocol: self.protocol,
            total_bandwidth_kbps: self.total_bandwidth_kbps,
            total_requests: self.total_requests,
            avg_response_time_ms,
            peak_bandwidth_kbps: self.peak_bandwidth_kbps,
            peak_hour: self.peak_at,
            unique_users: self.participants.len() as i64,
        }
    }
}

/// Owns the in-memory bucket map. Only the buffer processor mutates it, inside
/// a single tick, so no locking is needed.
#[derive(Default)]
pub struct Aggregator {
    buckets: HashMap<(i64, Protocol), HourlyBucket>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one deduplicated, validated sample into its (hour, protocol)
    /// bucket, creating the bucket lazily on the first sample of a new hour.
    pub fn fold(&mut self, sample: &Sample) {
        let start = hour_start(sample.timestamp);
        self.buckets
            .entry((start, sample.protocol))
            .or_insert_with(|| HourlyBucket::new(start, sample.protocol))
            .fold(sample);
    }

    /// Removes and finalizes every bucket whose hour window has closed.
    pub fn take_closed(&mut self, now_ms: i64) -> Vec<MetricsHourly> {
        let closed: Vec<(i64, Protocol)> = self
            .buckets
            .keys()
            .filter(|(start, _)| now_ms >= start + MS_PER_HOUR)
            .copied()
            .collect();
        let mut out = Vec::with_capacity(closed.len());
        for key in closed {
            if let Some(bucket) = self.buckets.remove(&key) {
                out.push(bucket.finalize());
            }
        }
        out.sort_by_key(|m| m.bucket_start);
        out
    }

    pub fn open_buckets(&self) -> usize {
        self.buckets.len()
    }
}

/// Re-aggregates one day's hourly rows for a single protocol into a daily row.
/// Peak comes from the hourly row with the maximum peak, not from raw samples
/// (raw samples are gone after hourly finalization); unique_users is the max
/// hourly value since a distinct daily count is not reconstructible.
pub fn rollup_day(
    day_start_ms: i64,
    protocol: Protocol,
    hourly: &[MetricsHourly],
) -> Option<MetricsDaily> {
    let rows: Vec<&MetricsHourly> = hourly
        .iter()
        .filter(|h| h.protocol == protocol)
        .filter(|h| h.bucket_start >= day_start_ms && h.bucket_start < day_start_ms + MS_PER_DAY)
        .collect();
    if rows.is_empty() {
        return None;
    }

    let total_bandwidth_kbps: f64 = rows.iter().map(|h| h.total_bandwidth_kbps).sum();
    let total_requests: i64 = rows.iter().map(|h| h.total_requests).sum();
    let sum_response_time_ms: f64 = rows
        .iter()
        .map(|h| h.avg_response_time_ms * h.total_requests as f64)
        .sum();
    let avg_response_time_ms = if total_requests > 0 {
        sum_response_time_ms / total_requests as f64
    } else {
        0.0
    };

    let peak_row = rows
        .iter()
        .max_by(|a, b| a.peak_bandwidth_kbps.total_cmp(&b.peak_bandwidth_kbps))?;
    let unique_users = rows.iter().map(|h| h.unique_users).max().unwrap_or(0);

    Some(MetricsDaily {
        day_start: day_start_ms,
        protocol,
        total_bandwidth_kbps,
        total_requests,
        avg_response_time_ms,
        peak_bandwidth_kbps: peak_row.peak_bandwidth_kbps,
        peak_hour: peak_row.peak_hour,
        unique_users,
    })
}
