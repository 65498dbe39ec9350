// SQLite store for finalized rollups and alerts. Hourly/daily rows are
// immutable once written; uniqueness per (bucket_start, protocol) is enforced
// by the schema, and ON CONFLICT DO NOTHING makes re-finalization idempotent.

use crate::aggregator::MS_PER_DAY;
use crate::alerts::AlertDraft;
use crate::models::{AlertType, BandwidthAlert, MetricsDaily, MetricsHourly, Protocol, Severity};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

pub struct MetricsRepo {
    pool: SqlitePool,
    retention_ms: i64,
}

impl MetricsRepo {
    pub async fn connect(path: &str, max_pool_size: u32, retention_days: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        let retention_ms = (retention_days as i64) * 24 * 60 * 60 * 1000;
        Ok(Self { pool, retention_ms })
    }

    /// Shared pool for the buffer and lifecycle store (same database file).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics_hourly (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bucket_start INTEGER NOT NULL,
                protocol TEXT NOT NULL,
                total_bandwidth_kbps REAL NOT NULL,
                total_requests INTEGER NOT NULL,
                avg_response_time_ms REAL NOT NULL,
                peak_bandwidth_kbps REAL NOT NULL,
                peak_hour INTEGER NOT NULL,
                unique_users INTEGER NOT NULL,
                UNIQUE(bucket_start, protocol)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics_daily (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                day_start INTEGER NOT NULL,
                protocol TEXT NOT NULL,
                total_bandwidth_kbps REAL NOT NULL,
                total_requests INTEGER NOT NULL,
                avg_response_time_ms REAL NOT NULL,
                peak_bandwidth_kbps REAL NOT NULL,
                peak_hour INTEGER NOT NULL,
                unique_users INTEGER NOT NULL,
                UNIQUE(day_start, protocol)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bandwidth_alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                metric_value REAL NOT NULL,
                threshold_value REAL,
                endpoint TEXT,
                protocol TEXT,
                created_at INTEGER NOT NULL,
                resolved_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_hourly_bucket_start ON metrics_hourly(bucket_start)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_alerts_open ON bandwidth_alerts(alert_type, endpoint, protocol) WHERE resolved_at IS NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, row), fields(repo = "metrics", operation = "save_hourly", bucket_start = row.bucket_start))]
    pub async fn save_hourly(&self, row: &MetricsHourly) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO metrics_hourly
             (bucket_start, protocol, total_bandwidth_kbps, total_requests,
              avg_response_time_ms, peak_bandwidth_kbps, peak_hour, unique_users)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT(bucket_start, protocol) DO NOTHING",
        )
        .bind(row.bucket_start)
        .bind(row.protocol.as_str())
        .bind(row.total_bandwidth_kbps)
        .bind(row.total_requests)
        .bind(row.avg_response_time_ms)
        .bind(row.peak_bandwidth_kbps)
        .bind(row.peak_hour)
        .bind(row.unique_users)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hourly rows in [from_ts, to_ts), newest bucket first (read surface).
    #[instrument(skip(self), fields(repo = "metrics", operation = "get_hourly_range"))]
    pub async fn get_hourly_range(
        &self,
        from_ts: i64,
        to_ts: i64,
    ) -> anyhow::Result<Vec<MetricsHourly>> {
        let rows = sqlx::query(
            "SELECT bucket_start, protocol, total_bandwidth_kbps, total_requests,
                    avg_response_time_ms, peak_bandwidth_kbps, peak_hour, unique_users
             FROM metrics_hourly
             WHERE bucket_start >= $1 AND bucket_start < $2
             ORDER BY bucket_start DESC",
        )
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_hourly_row).collect()
    }

    /// One day's hourly rows (all protocols), ascending, for daily rollup.
    pub async fn get_hourly_for_day(&self, day_start_ms: i64) -> anyhow::Result<Vec<MetricsHourly>> {
        let rows = sqlx::query(
            "SELECT bucket_start, protocol, total_bandwidth_kbps, total_requests,
                    avg_response_time_ms, peak_bandwidth_kbps, peak_hour, unique_users
             FROM metrics_hourly
             WHERE bucket_start >= $1 AND bucket_start < $2
             ORDER BY bucket_start ASC",
        )
        .bind(day_start_ms)
        .bind(day_start_ms + MS_PER_DAY)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_hourly_row).collect()
    }

    /// (day_start, protocol) pairs whose day has fully closed, that have hourly
    /// rows but no daily row yet.
    pub async fn pending_daily_rollups(&self, now_ms: i64) -> anyhow::Result<Vec<(i64, Protocol)>> {
        let rows = sqlx::query(
            "SELECT DISTINCT (h.bucket_start / $1) * $1 AS day_start, h.protocol AS protocol
             FROM metrics_hourly h
             WHERE (h.bucket_start / $1) * $1 + $1 <= $2
               AND NOT EXISTS (
                   SELECT 1 FROM metrics_daily d
                   WHERE d.day_start = (h.bucket_start / $1) * $1 AND d.protocol = h.protocol
               )
             ORDER BY day_start ASC",
        )
        .bind(MS_PER_DAY)
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let day_start: i64 = row.try_get("day_start")?;
            let protocol_str: String = row.try_get("protocol")?;
            let Some(protocol) = Protocol::parse(&protocol_str) else {
                tracing::warn!(protocol = %protocol_str, "unknown protocol in metrics_hourly, skipping");
                continue;
            };
            out.push((day_start, protocol));
        }
        Ok(out)
    }

    #[instrument(skip(self, row), fields(repo = "metrics", operation = "save_daily", day_start = row.day_start))]
    pub async fn save_daily(&self, row: &MetricsDaily) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO metrics_daily
             (day_start, protocol, total_bandwidth_kbps, total_requests,
              avg_response_time_ms, peak_bandwidth_kbps, peak_hour, unique_users)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT(day_start, protocol) DO NOTHING",
        )
        .bind(row.day_start)
        .bind(row.protocol.as_str())
        .bind(row.total_bandwidth_kbps)
        .bind(row.total_requests)
        .bind(row.avg_response_time_ms)
        .bind(row.peak_bandwidth_kbps)
        .bind(row.peak_hour)
        .bind(row.unique_users)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_daily(&self, day_start_ms: i64, protocol: Protocol) -> anyhow::Result<Option<MetricsDaily>> {
        let row = sqlx::query(
            "SELECT day_start, protocol, total_bandwidth_kbps, total_requests,
                    avg_response_time_ms, peak_bandwidth_kbps, peak_hour, unique_users
             FROM metrics_daily WHERE day_start = $1 AND protocol = $2",
        )
        .bind(day_start_ms)
        .bind(protocol.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::parse_daily_row).transpose()
    }

    /// Creates or refreshes the open alert for the draft's
    /// (alert_type, endpoint, protocol). Updating in place instead of
    /// inserting a second open row is what keeps alert storms bounded.
    #[instrument(skip(self, draft), fields(repo = "metrics", operation = "upsert_alert", alert_type = draft.alert_type.as_str()))]
    pub async fn upsert_alert(&self, draft: &AlertDraft, now_ms: i64) -> anyhow::Result<i64> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM bandwidth_alerts
             WHERE alert_type = $1 AND endpoint IS $2 AND protocol IS $3 AND resolved_at IS NULL
             LIMIT 1",
        )
        .bind(draft.alert_type.as_str())
        .bind(draft.endpoint.as_deref())
        .bind(draft.protocol.map(|p| p.as_str()))
        .fetch_optional(&mut *tx)
        .await?;

        let id = match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE bandwidth_alerts
                     SET severity = $1, message = $2, metric_value = $3,
                         threshold_value = $4, created_at = $5
                     WHERE id = $6",
                )
                .bind(draft.severity.as_str())
                .bind(&draft.message)
                .bind(draft.metric_value)
                .bind(draft.threshold_value)
                .bind(now_ms)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO bandwidth_alerts
                     (alert_type, severity, message, metric_value, threshold_value,
                      endpoint, protocol, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(draft.alert_type.as_str())
                .bind(draft.severity.as_str())
                .bind(&draft.message)
                .bind(draft.metric_value)
                .bind(draft.threshold_value)
                .bind(draft.endpoint.as_deref())
                .bind(draft.protocol.map(|p| p.as_str()))
                .bind(now_ms)
                .execute(&mut *tx)
                .await?;
                result.last_insert_rowid()
            }
        };

        tx.commit().await?;
        Ok(id)
    }

    /// Unresolved alerts, newest first, optionally at or above a severity.
    #[instrument(skip(self), fields(repo = "metrics", operation = "unresolved_alerts"))]
    pub async fn unresolved_alerts(
        &self,
        min_severity: Option<Severity>,
    ) -> anyhow::Result<Vec<BandwidthAlert>> {
        let rows = sqlx::query(
            "SELECT id, alert_type, severity, message, metric_value, threshold_value,
                    endpoint, protocol, created_at, resolved_at
             FROM bandwidth_alerts WHERE resolved_at IS NULL
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let alert = Self::parse_alert_row(row)?;
            if min_severity.is_none_or(|min| alert.severity >= min) {
                out.push(alert);
            }
        }
        Ok(out)
    }

    /// Marks an alert resolved (external resolution path). Returns false when
    /// the alert does not exist or was already resolved.
    pub async fn resolve_alert(&self, id: i64, now_ms: i64) -> anyhow::Result<bool> {
        let r = sqlx::query(
            "UPDATE bandwidth_alerts SET resolved_at = $1 WHERE id = $2 AND resolved_at IS NULL",
        )
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Drops rollups and resolved alerts past retention. Open alerts are kept.
    #[instrument(skip(self), fields(repo = "metrics", operation = "prune_old_data"))]
    pub async fn prune_old_data(&self, now_ms: i64) -> anyhow::Result<u64> {
        let cutoff = now_ms - self.retention_ms;
        let mut removed = 0;
        removed += sqlx::query("DELETE FROM metrics_hourly WHERE bucket_start < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        removed += sqlx::query("DELETE FROM metrics_daily WHERE day_start < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        removed += sqlx::query(
            "DELETE FROM bandwidth_alerts WHERE resolved_at IS NOT NULL AND resolved_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(removed)
    }

    /// Reclaim space after deletes (run on the VACUUM schedule).
    #[instrument(skip(self), fields(repo = "metrics", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    fn parse_hourly_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<MetricsHourly> {
        let protocol_str: String = row.try_get("protocol")?;
        let protocol = Protocol::parse(&protocol_str)
            .ok_or_else(|| anyhow::anyhow!("unknown protocol {:?}", protocol_str))?;
        Ok(MetricsHourly {
            bucket_start: row.try_get("bucket_start")?,
            protocol,
            total_bandwidth_kbps: row.try_get("total_bandwidth_kbps")?,
            total_requests: row.try_get("total_requests")?,
            avg_response_time_ms: row.try_get("avg_response_time_ms")?,
            peak_bandwidth_kbps: row.try_get("peak_bandwidth_kbps")?,
            peak_hour: row.try_get("peak_hour")?,
            unique_users: row.try_get("unique_users")?,
        })
    }

    fn parse_daily_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<MetricsDaily> {
        let protocol_str: String = row.try_get("protocol")?;
        let protocol = Protocol::parse(&protocol_str)
            .ok_or_else(|| anyhow::anyhow!("unknown protocol {:?}", protocol_str))?;
        Ok(MetricsDaily {
            day_start: row.try_get("day_start")?,
            protocol,
            total_bandwidth_kbps: row.try_get("total_bandwidth_kbps")?,
            total_requests: row.try_get("total_requests")?,
            avg_response_time_ms: row.try_get("avg_response_time_ms")?,
            peak_bandwidth_kbps: row.try_get("peak_bandwidth_kbps")?,
            peak_hour: row.try_get("peak_hour")?,
            unique_users: row.try_get("unique_users")?,
        })
    }

    fn parse_alert_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<BandwidthAlert> {
        let alert_type_str: String = row.try_get("alert_type")?;
        let alert_type = AlertType::parse(&alert_type_str)
            .ok_or_else(|| anyhow::anyhow!("unknown alert type {:?}", alert_type_str))?;
        let severity_str: String = row.try_get("severity")?;
        let severity = Severity::parse(&severity_str)
            .ok_or_else(|| anyhow::anyhow!("unknown severity {:?}", severity_str))?;
        let protocol: Option<Protocol> = row
            .try_get::<Option<String>, _>("protocol")?
            .as_deref()
            .and_then(Protocol::parse);
        Ok(BandwidthAlert {
            id: row.try_get("id")?,
            alert_type,
            severity,
            message: row.try_get("message")?,
            metric_value: row.try_get("metric_value")?,
            threshold_value: row.try_get("threshold_value")?,
            endpoint: row.try_get("endpoint")?,
            protocol,
            created_at: row.try_get("created_at")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }
}
