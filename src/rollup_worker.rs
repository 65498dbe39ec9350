// Background worker: roll closed days' hourly rows into daily rows, prune
// retention, and drop long-stale snapshots. Runs every rollup_interval_secs.
// VACUUM runs on a configurable schedule (cron expression or fixed interval).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregator;
use crate::metrics_repo::MetricsRepo;
use crate::processor::now_ms;
use crate::snapshot_store::SnapshotStore;
use tracing::{info, instrument, warn};

/// Config for the rollup worker.
#[derive(Debug, Clone)]
pub struct RollupWorkerConfig {
    pub rollup_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

/// Spawns the rollup worker. Returns a join handle.
pub fn spawn(
    repo: Arc<MetricsRepo>,
    snapshots: Arc<SnapshotStore>,
    config: RollupWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(repo, snapshots, config).await;
    })
}

#[instrument(skip(repo, snapshots), fields(interval_secs = config.rollup_interval_secs))]
async fn run(repo: Arc<MetricsRepo>, snapshots: Arc<SnapshotStore>, config: RollupWorkerConfig) {
    let mut rollup_interval = tokio::time::interval(Duration::from_secs(config.rollup_interval_secs));
    rollup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(vacuum_scheduler(config.clone(), vacuum_tx));

    loop {
        tokio::select! {
            _ = rollup_interval.tick() => {
                if let Err(e) = run_one_tick(&repo, &snapshots, now_ms()).await {
                    warn!(error = %e, "rollup tick failed");
                }
            }
            _ = vacuum_rx.recv() => {
                if let Err(e) = repo.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
        }
    }
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(config: RollupWorkerConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

/// Runs one rollup pass (closed days -> daily rows, then retention pruning)
/// as of `now`. Used by the worker loop and callable directly from tests.
pub async fn run_one_tick(
    repo: &MetricsRepo,
    snapshots: &SnapshotStore,
    now: i64,
) -> anyhow::Result<()> {
    let pending = repo.pending_daily_rollups(now).await?;
    let mut rolled_up: u32 = 0;
    for (day_start, protocol) in pending {
        let hourly = repo.get_hourly_for_day(day_start).await?;
        if let Some(daily) = aggregator::rollup_day(day_start, protocol, &hourly) {
            repo.save_daily(&daily).await?;
            rolled_up += 1;
        }
    }
    if rolled_up > 0 {
        info!(rolled_up_days = rolled_up, "hourly -> daily rollup");
    }

    let removed = repo.prune_old_data(now).await?;
    if removed > 0 {
        info!(rows_removed = removed, "retention prune");
    }
    let dropped = snapshots.prune(now).await;
    if dropped > 0 {
        info!(snapshots_dropped = dropped, "stale snapshot prune");
    }

    Ok(())
}
