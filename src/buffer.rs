// Durable sample queue (SQLite). Producers enqueue fail-fast; the processor
// drains in batches. A single DELETE .. RETURNING makes concurrent drains
// non-overlapping (the write lock serializes them).

use crate::error::PipelineError;
use crate::models::{Protocol, Sample};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::instrument;

pub struct SampleBuffer {
    pool: SqlitePool,
}

impl SampleBuffer {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sample_buffer (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id TEXT NOT NULL,
                participant_id TEXT NOT NULL,
                producer_id TEXT NOT NULL,
                sequence_id INTEGER NOT NULL,
                protocol TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                upload_bitrate_kbps REAL NOT NULL,
                download_bitrate_kbps REAL NOT NULL,
                latency_ms REAL NOT NULL,
                packet_loss_pct REAL NOT NULL,
                using_relay INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends one sample. Fails fast with `BufferUnavailable` when the store
    /// errors; producers drop-and-log rather than block the hot path.
    pub async fn enqueue(&self, sample: &Sample) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO sample_buffer
             (room_id, participant_id, producer_id, sequence_id, protocol, timestamp,
              upload_bitrate_kbps, download_bitrate_kbps, latency_ms, packet_loss_pct, using_relay)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&sample.room_id)
        .bind(&sample.participant_id)
        .bind(&sample.producer_id)
        .bind(sample.sequence_id as i64)
        .bind(sample.protocol.as_str())
        .bind(sample.timestamp)
        .bind(sample.upload_bitrate_kbps)
        .bind(sample.download_bitrate_kbps)
        .bind(sample.latency_ms)
        .bind(sample.packet_loss_pct)
        .bind(sample.using_relay as i64)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::BufferUnavailable)?;
        Ok(())
    }

    /// Per-item outcomes for the batch ingestion endpoint.
    pub async fn enqueue_batch(&self, samples: &[Sample]) -> Vec<Result<(), PipelineError>> {
        let mut out = Vec::with_capacity(samples.len());
        for s in samples {
            out.push(self.enqueue(s).await);
        }
        out
    }

    /// Atomically removes and returns up to `max` samples in arrival order.
    /// Rows that no longer decode are skipped with a warning rather than
    /// aborting the batch.
    #[instrument(skip(self), fields(repo = "buffer", operation = "drain"))]
    pub async fn drain(&self, max: u32) -> Result<Vec<Sample>, PipelineError> {
        let rows = sqlx::query(
            "DELETE FROM sample_buffer
             WHERE id IN (SELECT id FROM sample_buffer ORDER BY id ASC LIMIT $1)
             RETURNING id, room_id, participant_id, producer_id, sequence_id, protocol,
                       timestamp, upload_bitrate_kbps, download_bitrate_kbps,
                       latency_ms, packet_loss_pct, using_relay",
        )
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::BufferUnavailable)?;

        let mut decoded: Vec<(i64, Sample)> = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::parse_row(&row) {
                Ok(pair) => decoded.push(pair),
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable buffer row dropped");
                }
            }
        }
        decoded.sort_by_key(|(id, _)| *id);
        Ok(decoded.into_iter().map(|(_, s)| s).collect())
    }

    /// Current queue depth for the status endpoint.
    pub async fn depth(&self) -> Result<i64, PipelineError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sample_buffer")
            .fetch_one(&self.pool)
            .await
            .map_err(PipelineError::BufferUnavailable)
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<(i64, Sample)> {
        let id: i64 = row.try_get("id")?;
        let protocol_str: String = row.try_get("protocol")?;
        let protocol = Protocol::parse(&protocol_str)
            .ok_or_else(|| anyhow::anyhow!("unknown protocol {:?}", protocol_str))?;
        let sample = Sample {
            room_id: row.try_get("room_id")?,
            participant_id: row.try_get("participant_id")?,
            producer_id: row.try_get("producer_id")?,
            sequence_id: row.try_get::<i64, _>("sequence_id")? as u64,
            protocol,
            timestamp: row.try_get("timestamp")?,
            upload_bitrate_kbps: row.try_get("upload_bitrate_kbps")?,
            download_bitrate_kbps: row.try_get("download_bitrate_kbps")?,
            latency_ms: row.try_get("latency_ms")?,
            packet_loss_pct: row.try_get("packet_loss_pct")?,
            using_relay: row.try_get::<i64, _>("using_relay")? != 0,
        };
        Ok((id, sample))
    }
}
