// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::buffer::SampleBuffer;
use crate::lifecycle_store::LifecycleStore;
use crate::metrics_repo::MetricsRepo;
use crate::models::RealtimeSnapshot;
use crate::processor::PipelineStatus;
use crate::snapshot_store::SnapshotStore;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) buffer: Arc<SampleBuffer>,
    pub(crate) snapshots: Arc<SnapshotStore>,
    pub(crate) metrics_repo: Arc<MetricsRepo>,
    pub(crate) lifecycle: Arc<LifecycleStore>,
    pub(crate) status: Arc<PipelineStatus>,
    pub(crate) snapshot_tx: broadcast::Sender<Vec<RealtimeSnapshot>>,
}

pub struct AppDeps {
    pub buffer: Arc<SampleBuffer>,
    pub snapshots: Arc<SnapshotStore>,
    pub metrics_repo: Arc<MetricsRepo>,
    pub lifecycle: Arc<LifecycleStore>,
    pub status: Arc<PipelineStatus>,
    pub snapshot_tx: broadcast::Sender<Vec<RealtimeSnapshot>>,
}

pub fn app(deps: AppDeps) -> Router {
    let state = AppState {
        buffer: deps.buffer,
        snapshots: deps.snapshots,
        metrics_repo: deps.metrics_repo,
        lifecycle: deps.lifecycle,
        status: deps.status,
        snapshot_tx: deps.snapshot_tx,
    };
    Router::new()
        .route("/", get(|| async { "netpulse telemetry pipeline" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/snapshots", get(http::snapshots_handler)) // GET /api/snapshots?roomId=
        .route("/api/status", get(http::status_handler)) // GET /api/status
        .route("/api/metrics/hourly", get(http::hourly_handler)) // GET /api/metrics/hourly?from=&to=
        .route("/api/alerts", get(http::alerts_handler)) // GET /api/alerts?severity=
        .route("/api/samples", post(http::ingest_samples_handler)) // POST /api/samples
        .route(
            "/api/events",
            get(http::recent_events_handler).post(http::ingest_event_handler),
        )
        .route("/ws/snapshots", get(ws::ws_snapshots)) // WS /ws/snapshots
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
