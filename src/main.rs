use anyhow::Result;
use netpulse::*;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let metrics_repo = Arc::new(
        metrics_repo::MetricsRepo::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
            app_config.database.retention_days,
        )
        .await?,
    );
    metrics_repo.init().await?;

    let buffer = Arc::new(buffer::SampleBuffer::new(metrics_repo.pool().clone()));
    buffer.init().await?;
    let lifecycle = Arc::new(lifecycle_store::LifecycleStore::new(
        metrics_repo.pool().clone(),
    ));
    lifecycle.init().await?;

    let snapshots = Arc::new(snapshot_store::SnapshotStore::new(
        app_config.pipeline.snapshot_ttl_secs as i64 * 1000,
    ));
    let status = Arc::new(processor::PipelineStatus::new());
    let (snapshot_tx, _) = broadcast::channel::<Vec<models::RealtimeSnapshot>>(
        app_config.pipeline.broadcast_capacity,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let processor = processor::Processor::new(
        processor::ProcessorDeps {
            buffer: buffer.clone(),
            snapshots: snapshots.clone(),
            metrics_repo: metrics_repo.clone(),
            status: status.clone(),
            snapshot_tx: snapshot_tx.clone(),
        },
        processor::ProcessorConfig {
            drain_interval_secs: app_config.pipeline.drain_interval_secs,
            max_batch_size: app_config.pipeline.max_batch_size,
            tick_deadline_ms: app_config.pipeline.tick_deadline_ms,
            dedupe_window_secs: app_config.pipeline.dedupe_window_secs,
            stats_log_interval_secs: app_config.pipeline.stats_log_interval_secs,
            alerts: app_config.alerts.clone(),
        },
    );
    let processor_handle = processor::spawn(processor, shutdown_rx);

    rollup_worker::spawn(
        metrics_repo.clone(),
        snapshots.clone(),
        rollup_worker::RollupWorkerConfig {
            rollup_interval_secs: app_config.pipeline.rollup_interval_secs,
            vacuum_schedule: app_config.pipeline.vacuum_schedule.clone(),
            vacuum_interval_secs: app_config.pipeline.vacuum_interval_secs,
        },
    );

    let app = routes::app(routes::AppDeps {
        buffer,
        snapshots,
        metrics_repo,
        lifecycle,
        status,
        snapshot_tx,
    });
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let in_container = std::path::Path::new("/.dockerenv").exists()
        || std::env::var("CONTAINER").as_deref() == Ok("1");

    if in_container {
        // In Docker: run server until error or SIGTERM (no signal handler; avoids immediate exit)
        axum::serve(listener, app).await?;
    } else {
        tokio::select! {
            result = axum::serve(listener, app) => {
                result?;
            }
            _ = async {
                #[cfg(unix)]
                {
                    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                        Ok(s) => s,
                        Err(_) => {
                            let _ = tokio::signal::ctrl_c().await;
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    tokio::signal::ctrl_c().await
                }
            } => {
                tracing::info!("Received shutdown signal");
                let _ = shutdown_tx.send(());
                let _ = processor_handle.await;
            }
        }
    }

    Ok(())
}
