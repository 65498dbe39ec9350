// Append-only log of externally-sourced room/participant lifecycle events.
// Independent write path; nothing in the aggregation pipeline depends on it.
// This store exclusively owns the webhook_events table.

use crate::models::WebhookEvent;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::instrument;

/// Inbound event payload (before storage assigns an id).
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub event: String,
    pub room_name: Option<String>,
    pub participant_identity: Option<String>,
    #[serde(default)]
    pub event_data: serde_json::Value,
    #[serde(default)]
    pub is_test_event: bool,
}

pub struct LifecycleStore {
    pool: SqlitePool,
}

impl LifecycleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event TEXT NOT NULL,
                room_name TEXT,
                participant_identity TEXT,
                event_data TEXT NOT NULL,
                is_test_event INTEGER NOT NULL DEFAULT 0,
                processed INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_webhook_events_created_at ON webhook_events(created_at)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends one event and returns its id. The autoincrement id is the
    /// tiebreaker for same-millisecond events within a room.
    #[instrument(skip(self, event), fields(repo = "lifecycle", operation = "record", event = %event.event))]
    pub async fn record(&self, event: &LifecycleEvent, now_ms: i64) -> anyhow::Result<i64> {
        let event_data = serde_json::to_string(&event.event_data)?;
        let result = sqlx::query(
            "INSERT INTO webhook_events
             (event, room_name, participant_identity, event_data, is_test_event, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&event.event)
        .bind(event.room_name.as_deref())
        .bind(event.participant_identity.as_deref())
        .bind(&event_data)
        .bind(event.is_test_event as i64)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Records the outcome of an optional downstream handler.
    pub async fn mark_processed(
        &self,
        id: i64,
        error_message: Option<&str>,
    ) -> anyhow::Result<bool> {
        let r = sqlx::query(
            "UPDATE webhook_events SET processed = 1, error_message = $1 WHERE id = $2",
        )
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Most recent events for correlation/debugging, newest first
    /// (created_at, then id for same-millisecond ordering).
    pub async fn recent(&self, limit: u32) -> anyhow::Result<Vec<WebhookEvent>> {
        let rows = sqlx::query(
            "SELECT id, event, room_name, participant_identity, event_data,
                    is_test_event, processed, error_message, created_at
             FROM webhook_events ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(Self::parse_row(row)?);
        }
        Ok(out)
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<WebhookEvent> {
        let event_data_str: String = row.try_get("event_data")?;
        let event_data = serde_json::from_str(&event_data_str).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "undecodable event_data, using null");
            serde_json::Value::Null
        });
        Ok(WebhookEvent {
            id: row.try_get("id")?,
            event: row.try_get("event")?,
            room_name: row.try_get("room_name")?,
            participant_identity: row.try_get("participant_identity")?,
            event_data,
            is_test_event: row.try_get::<i64, _>("is_test_event")? != 0,
            processed: row.try_get::<i64, _>("processed")? != 0,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
