pub mod reorg;
pub mod sequential;
pub mod state;
pub mod window;

/// Top-level control loop: one long-lived loop that each tick refreshes
/// the target height, checks for a reorg, computes a window, and
/// dispatches to the sequential or parallel path.
use crate::config::{Config, IndexerConfig};
use crate::db::sync_status;
use crate::metrics::{CURRENT_HEIGHT, TARGET_HEIGHT};
use crate::node::NodeClient;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const ACCELERATED_BACKFILL_THRESHOLD: i64 = 1000;

pub async fn run(config: &Config, pool: PgPool, shutdown: CancellationToken) {
    let node = Arc::new(NodeClient::new(&config.node));
    let indexer_cfg = &config.indexer;

    loop {
        if shutdown.is_cancelled() {
            info!("control loop observed shutdown signal, exiting");
            return;
        }

        match tick(&node, &pool, indexer_cfg).await {
            Ok(idle) if idle => {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(indexer_cfg.idle_poll_interval_secs)) => {}
                    _ = shutdown.cancelled() => {
                        info!("shutdown observed during idle sleep");
                        return;
                    }
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "control loop tick failed, backing off");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

/// Runs one iteration. Returns `Ok(true)` if the indexer is caught up
/// (idle) and the caller should sleep `idlePollInterval`.
async fn tick(node: &Arc<NodeClient>, pool: &PgPool, cfg: &IndexerConfig) -> Result<bool, String> {
    let target_height = node
        .get_current_height()
        .await
        .map_err(|e| format!("failed to refresh target height: {e}"))?;
    sync_status::set_target(pool, target_height)
        .await
        .map_err(|e| format!("failed to persist target height: {e}"))?;
    TARGET_HEIGHT.set(target_height);

    let status = sync_status::load(pool)
        .await
        .map_err(|e| format!("failed to load sync status: {e}"))?;
    let current_height = status.current_height;
    CURRENT_HEIGHT.set(current_height);

    if current_height > 0 {
        if let Some(new_height) =
            crate::pipeline::reorg::detect_and_handle(node, pool, current_height)
                .await
                .map_err(|e| format!("reorg check failed: {e}"))?
        {
            info!(new_height, "reorg handled, resuming from new cursor");
            return Ok(false);
        }
    }

    if current_height >= target_height {
        if status.is_syncing {
            sync_status::set_syncing(pool, false)
                .await
                .map_err(|e| format!("failed to clear is_syncing: {e}"))?;
        }
        return Ok(true);
    }

    if !status.is_syncing {
        sync_status::set_syncing(pool, true)
            .await
            .map_err(|e| format!("failed to set is_syncing: {e}"))?;
    }

    let remaining = target_height - current_height;
    let mut batch_size = cfg.batch_size.min(remaining);
    if remaining > ACCELERATED_BACKFILL_THRESHOLD {
        batch_size = (batch_size * 2).min(remaining);
    }
    batch_size = batch_size.max(1);

    let window_end = current_height + batch_size;
    if batch_size == 1 || !cfg.parallel_mode {
        sequential::process_height(node, pool, current_height + 1, "sequential")
            .await
            .map_err(|e| e.to_string())?;
    } else {
        window::run_window(node.clone(), pool.clone(), cfg, current_height, window_end).await;
    }

    let status = sync_status::load(pool)
        .await
        .map_err(|e| format!("failed to reload sync status: {e}"))?;
    CURRENT_HEIGHT.set(status.current_height);
    info!(current_height = status.current_height, target_height, "window complete");

    Ok(false)
}
