// Alert evaluation over one drained batch. Pure over its own state (EMA
// baselines + last-tick anomaly strikes); persistence is metrics_repo's upsert.

use crate::config::AlertConfig;
use crate::models::{AlertType, Protocol, Sample, Severity};
use std::collections::{HashMap, HashSet};

/// An alert the evaluator wants stored. The repo's upsert keeps at most one
/// unresolved row per (alert_type, endpoint, protocol).
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDraft {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub metric_value: f64,
    pub threshold_value: Option<f64>,
    pub endpoint: Option<String>,
    pub protocol: Option<Protocol>,
}

pub struct AlertEvaluator {
    config: AlertConfig,
    /// Exponential moving average of per-protocol batch-mean bandwidth.
    baselines: HashMap<Protocol, f64>,
    /// Endpoints (rooms) that exceeded an anomaly bound on the previous tick.
    prior_strikes: HashSet<String>,
}

impl AlertEvaluator {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            baselines: HashMap::new(),
            prior_strikes: HashSet::new(),
        }
    }

    pub fn baseline(&self, protocol: Protocol) -> Option<f64> {
        self.baselines.get(&protocol).copied()
    }

    /// Seeds a baseline directly (warm start / tests).
    pub fn set_baseline(&mut self, protocol: Protocol, value: f64) {
        self.baselines.insert(protocol, value);
    }

    /// Scores one batch. Rules run in order (threshold, spike, anomaly) and
    /// fire independently; spikes are judged against the baseline as it stood
    /// before this tick's EMA update.
    pub fn evaluate(&mut self, batch: &[Sample]) -> Vec<AlertDraft> {
        if batch.is_empty() {
            // An empty tick still clears anomaly streaks.
            self.prior_strikes.clear();
            return Vec::new();
        }
        let mut drafts = Vec::new();
        self.check_thresholds(batch, &mut drafts);
        self.check_spikes(batch, &mut drafts);
        self.check_anomalies(batch, &mut drafts);
        drafts
    }

    /// Hard ceiling on any single sample's bitrate. One draft per
    /// (room, protocol) per batch, keeping the worst offender.
    fn check_thresholds(&self, batch: &[Sample], drafts: &mut Vec<AlertDraft>) {
        let ceiling = self.config.threshold_ceiling_kbps;
        let mut worst: HashMap<(String, Protocol), f64> = HashMap::new();
        for sample in batch {
            let value = sample.upload_bitrate_kbps.max(sample.download_bitrate_kbps);
            if value <= ceiling {
                continue;
            }
            let key = (sample.room_id.clone(), sample.protocol);
            let entry = worst.entry(key).or_insert(value);
            if value > *entry {
                *entry = value;
            }
        }
        for ((room_id, protocol), value) in worst {
            let severity = if value >= ceiling * self.config.critical_factor {
                Severity::Critical
            } else {
                Severity::High
            };
            drafts.push(AlertDraft {
                alert_type: AlertType::Threshold,
                severity,
                message: format!(
                    "bitrate {:.0} kbps over ceiling {:.0} kbps in {} ({})",
                    value,
                    ceiling,
                    room_id,
                    protocol.as_str()
                ),
                metric_value: value,
                threshold_value: Some(ceiling),
                endpoint: Some(room_id),
                protocol: Some(protocol),
            });
        }
    }

    /// Per-protocol batch mean vs the rolling baseline. The EMA is updated for
    /// every protocol seen in the batch, spike or not.
    fn check_spikes(&mut self, batch: &[Sample], drafts: &mut Vec<AlertDraft>) {
        let mut sums: HashMap<Protocol, (f64, u32)> = HashMap::new();
        for sample in batch {
            let entry = sums.entry(sample.protocol).or_insert((0.0, 0));
            entry.0 += sample.bandwidth_kbps();
            entry.1 += 1;
        }
        for (protocol, (sum, count)) in sums {
            let mean = sum / count as f64;
            let prior = self.baselines.get(&protocol).copied();
            if let Some(baseline) = prior
                && baseline > 0.0
                && mean > baseline * self.config.spike_factor
            {
                drafts.push(AlertDraft {
                    alert_type: AlertType::Spike,
                    severity: Severity::Medium,
                    message: format!(
                        "{} mean bandwidth {:.0} kbps exceeds {:.1}x baseline {:.0} kbps",
                        protocol.as_str(),
                        mean,
                        self.config.spike_factor,
                        baseline
                    ),
                    metric_value: mean,
                    threshold_value: Some(baseline * self.config.spike_factor),
                    endpoint: None,
                    protocol: Some(protocol),
                });
            }
            let alpha = self.config.baseline_alpha;
            let updated = match prior {
                Some(baseline) => alpha * mean + (1.0 - alpha) * baseline,
                None => mean,
            };
            self.baselines.insert(protocol, updated);
        }
    }

    /// Packet loss / latency over bound for the same room on two consecutive
    /// ticks. One strike is tolerated; the second fires.
    fn check_anomalies(&mut self, batch: &[Sample], drafts: &mut Vec<AlertDraft>) {
        struct RoomWorst {
            protocol: Protocol,
            packet_loss_pct: f64,
            latency_ms: f64,
        }
        let mut rooms: HashMap<String, RoomWorst> = HashMap::new();
        for sample in batch {
            let entry = rooms
                .entry(sample.room_id.clone())
                .or_insert_with(|| RoomWorst {
                    protocol: sample.protocol,
                    packet_loss_pct: 0.0,
                    latency_ms: 0.0,
                });
            entry.packet_loss_pct = entry.packet_loss_pct.max(sample.packet_loss_pct);
            entry.latency_ms = entry.latency_ms.max(sample.latency_ms);
        }

        let mut current_strikes = HashSet::new();
        for (room_id, worst) in rooms {
            let loss_over = worst.packet_loss_pct > self.config.packet_loss_pct;
            let latency_over = worst.latency_ms > self.config.latency_ms;
            if !loss_over && !latency_over {
                continue;
            }
            if self.prior_strikes.contains(&room_id) {
                let (message, metric_value, threshold_value) = if loss_over {
                    (
                        format!(
                            "packet loss {:.1}% over {:.1}% in {} for consecutive ticks",
                            worst.packet_loss_pct, self.config.packet_loss_pct, room_id
                        ),
                        worst.packet_loss_pct,
                        self.config.packet_loss_pct,
                    )
                } else {
                    (
                        format!(
                            "latency {:.0}ms over {:.0}ms in {} for consecutive ticks",
                            worst.latency_ms, self.config.latency_ms, room_id
                        ),
                        worst.latency_ms,
                        self.config.latency_ms,
                    )
                };
                drafts.push(AlertDraft {
                    alert_type: AlertType::Anomaly,
                    severity: Severity::High,
                    message,
                    metric_value,
                    threshold_value: Some(threshold_value),
                    endpoint: Some(room_id.clone()),
                    protocol: Some(worst.protocol),
                });
            }
            current_strikes.insert(room_id);
        }
        self.prior_strikes = current_strikes;
    }
}
