use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

/// Drain cadence, batch sizing, and staleness bounds for the buffer processor.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,
    /// Hard deadline for one processing tick; leftover work waits for the next tick.
    #[serde(default = "default_tick_deadline_ms")]
    pub tick_deadline_ms: u64,
    /// How long a (producerId, sequenceId) pair is remembered for dedupe.
    #[serde(default = "default_dedupe_window_secs")]
    pub dedupe_window_secs: u64,
    /// Snapshots older than this are excluded from active views.
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,
    /// Max live snapshot batches kept in the broadcast channel (slow WS clients may lag).
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// How often to log app stats (real seconds).
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
    /// Daily rollup / retention pass cadence.
    #[serde(default = "default_rollup_interval_secs")]
    pub rollup_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 3 * * *" = 03:00 daily). Uses local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

fn default_drain_interval_secs() -> u64 {
    5
}

fn default_max_batch_size() -> u32 {
    500
}

fn default_tick_deadline_ms() -> u64 {
    4500
}

fn default_dedupe_window_secs() -> u64 {
    60
}

fn default_snapshot_ttl_secs() -> u64 {
    60
}

fn default_broadcast_capacity() -> usize {
    32
}

fn default_stats_log_interval_secs() -> u64 {
    60
}

fn default_rollup_interval_secs() -> u64 {
    300
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

/// Alert rule constants. Tunable; defaults match the documented rules.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Hard ceiling for any single sample's upload/download bitrate.
    #[serde(default = "default_threshold_ceiling_kbps")]
    pub threshold_ceiling_kbps: f64,
    /// Over the ceiling by this factor or more escalates high -> critical.
    #[serde(default = "default_critical_factor")]
    pub critical_factor: f64,
    /// Batch mean above baseline x factor is a spike.
    #[serde(default = "default_spike_factor")]
    pub spike_factor: f64,
    /// EMA smoothing for the rolling per-protocol baseline.
    #[serde(default = "default_baseline_alpha")]
    pub baseline_alpha: f64,
    /// Packet loss bound for the anomaly rule (consecutive ticks).
    #[serde(default = "default_packet_loss_pct")]
    pub packet_loss_pct: f64,
    /// Latency bound for the anomaly rule (consecutive ticks).
    #[serde(default = "default_latency_ms")]
    pub latency_ms: f64,
}

fn default_threshold_ceiling_kbps() -> f64 {
    10_000.0
}

fn default_critical_factor() -> f64 {
    2.0
}

fn default_spike_factor() -> f64 {
    3.0
}

fn default_baseline_alpha() -> f64 {
    0.3
}

fn default_packet_loss_pct() -> f64 {
    5.0
}

fn default_latency_ms() -> f64 {
    400.0
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.retention_days > 0,
            "database.retention_days must be > 0, got {}",
            self.database.retention_days
        );
        anyhow::ensure!(
            self.pipeline.drain_interval_secs > 0,
            "pipeline.drain_interval_secs must be > 0, got {}",
            self.pipeline.drain_interval_secs
        );
        anyhow::ensure!(
            self.pipeline.max_batch_size > 0,
            "pipeline.max_batch_size must be > 0, got {}",
            self.pipeline.max_batch_size
        );
        anyhow::ensure!(
            self.pipeline.tick_deadline_ms > 0
                && self.pipeline.tick_deadline_ms < self.pipeline.drain_interval_secs * 1000,
            "pipeline.tick_deadline_ms must be > 0 and below the drain interval, got {}",
            self.pipeline.tick_deadline_ms
        );
        anyhow::ensure!(
            self.pipeline.dedupe_window_secs > 0,
            "pipeline.dedupe_window_secs must be > 0, got {}",
            self.pipeline.dedupe_window_secs
        );
        anyhow::ensure!(
            self.pipeline.snapshot_ttl_secs > 0,
            "pipeline.snapshot_ttl_secs must be > 0, got {}",
            self.pipeline.snapshot_ttl_secs
        );
        anyhow::ensure!(
            self.pipeline.broadcast_capacity > 0,
            "pipeline.broadcast_capacity must be > 0, got {}",
            self.pipeline.broadcast_capacity
        );
        anyhow::ensure!(
            self.pipeline.stats_log_interval_secs > 0,
            "pipeline.stats_log_interval_secs must be > 0, got {}",
            self.pipeline.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.pipeline.rollup_interval_secs > 0,
            "pipeline.rollup_interval_secs must be > 0, got {}",
            self.pipeline.rollup_interval_secs
        );
        anyhow::ensure!(
            self.alerts.threshold_ceiling_kbps > 0.0,
            "alerts.threshold_ceiling_kbps must be > 0, got {}",
            self.alerts.threshold_ceiling_kbps
        );
        anyhow::ensure!(
            self.alerts.critical_factor >= 1.0,
            "alerts.critical_factor must be >= 1, got {}",
            self.alerts.critical_factor
        );
        anyhow::ensure!(
            self.alerts.spike_factor > 1.0,
            "alerts.spike_factor must be > 1, got {}",
            self.alerts.spike_factor
        );
        anyhow::ensure!(
            self.alerts.baseline_alpha > 0.0 && self.alerts.baseline_alpha <= 1.0,
            "alerts.baseline_alpha must be in (0, 1], got {}",
            self.alerts.baseline_alpha
        );
        anyhow::ensure!(
            self.alerts.packet_loss_pct > 0.0 && self.alerts.packet_loss_pct <= 100.0,
            "alerts.packet_loss_pct must be in (0, 100], got {}",
            self.alerts.packet_loss_pct
        );
        anyhow::ensure!(
            self.alerts.latency_ms > 0.0,
            "alerts.latency_ms must be > 0, got {}",
            self.alerts.latency_ms
        );
        Ok(())
    }
}
