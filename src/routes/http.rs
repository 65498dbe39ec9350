// GET/POST handlers for the read and write surfaces

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::aggregator::MS_PER_DAY;
use crate::error::PipelineError;
use crate::lifecycle_store::LifecycleEvent;
use crate::models::{Sample, Severity};
use crate::processor::now_ms;
use crate::version::{NAME, VERSION};

/// GET /version — returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SnapshotsQuery {
    room_id: Option<String>,
}

/// GET /api/snapshots — all non-stale snapshots, optionally for one room.
pub(super) async fn snapshots_handler(
    State(state): State<AppState>,
    Query(query): Query<SnapshotsQuery>,
) -> impl IntoResponse {
    let active = state
        .snapshots
        .active(now_ms(), query.room_id.as_deref())
        .await;
    Json(active)
}

/// GET /api/status — buffer depth, last drain, and processor counters.
/// Best-available: a buffer error reports depth -1 rather than failing the read.
pub(super) async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let depth = match state.buffer.depth().await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, operation = "status_query", "buffer depth unavailable");
            -1
        }
    };
    Json(state.status.view(depth))
}

#[derive(Debug, Deserialize)]
pub(super) struct HourlyQuery {
    from: Option<i64>,
    to: Option<i64>,
}

/// GET /api/metrics/hourly — finalized hourly rows in [from, to), newest first.
/// Defaults to the trailing 24 hours.
pub(super) async fn hourly_handler(
    State(state): State<AppState>,
    Query(query): Query<HourlyQuery>,
) -> impl IntoResponse {
    let now = now_ms();
    let to = query.to.unwrap_or(now);
    let from = query.from.unwrap_or(to - MS_PER_DAY);
    match state.metrics_repo.get_hourly_range(from, to).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, operation = "hourly_query", "hourly query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct AlertsQuery {
    severity: Option<String>,
}

/// GET /api/alerts — unresolved alerts, optionally at or above a severity.
pub(super) async fn alerts_handler(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    let min_severity = match query.severity.as_deref() {
        None => None,
        Some(s) => match Severity::parse(s) {
            Some(sev) => Some(sev),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("unknown severity {:?}", s),
                )
                    .into_response();
            }
        },
    };
    match state.metrics_repo.unresolved_alerts(min_severity).await {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, operation = "alerts_query", "alerts query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// One sample or a small batch; the producer side sends both shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum SampleIngest {
    One(Box<Sample>),
    Many(Vec<Sample>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct IngestResult {
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// POST /api/samples — validate then enqueue into the durable buffer, with a
/// per-item outcome. Enqueue is fail-fast; a buffer error is reported to the
/// producer, which is expected to drop-and-log rather than retry forever.
pub(super) async fn ingest_samples_handler(
    State(state): State<AppState>,
    Json(ingest): Json<SampleIngest>,
) -> impl IntoResponse {
    let samples = match ingest {
        SampleIngest::One(s) => vec![*s],
        SampleIngest::Many(v) => v,
    };
    let mut results = Vec::with_capacity(samples.len());
    for sample in &samples {
        if let Err(reason) = sample.validate() {
            results.push(IngestResult {
                accepted: false,
                error: Some(PipelineError::malformed(reason).to_string()),
            });
            continue;
        }
        match state.buffer.enqueue(sample).await {
            Ok(()) => results.push(IngestResult {
                accepted: true,
                error: None,
            }),
            Err(e) => {
                tracing::warn!(error = %e, operation = "ingest_samples", "enqueue failed");
                results.push(IngestResult {
                    accepted: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    Json(results)
}

/// POST /api/events — append one lifecycle event, returns the stored id.
pub(super) async fn ingest_event_handler(
    State(state): State<AppState>,
    Json(event): Json<LifecycleEvent>,
) -> impl IntoResponse {
    match state.lifecycle.record(&event, now_ms()).await {
        Ok(id) => Json(serde_json::json!({ "id": id })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, operation = "ingest_event", "event record failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct RecentEventsQuery {
    limit: Option<u32>,
}

/// GET /api/events — most recent lifecycle events (debugging/correlation).
pub(super) async fn recent_events_handler(
    State(state): State<AppState>,
    Query(query): Query<RecentEventsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50).min(500);
    match state.lifecycle.recent(limit).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, operation = "recent_events", "events query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
