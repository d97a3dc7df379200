/// Reorganization recovery: soft deletes via SQL rather than physical
/// row removal. `main_chain` is flipped to `false` rather than rows
/// being deleted, so historical reads stay honest about what the
/// indexer once believed and reorg handling is reversible if bugs are
/// found later (see DESIGN.md for the soft-delete-vs-cascade-delete
/// tradeoff).
use crate::error::PersistError;
use crate::metrics::REORGS_HANDLED;
use crate::model::Block;
use crate::node::NodeClient;
use sqlx::PgPool;
use tracing::{info, warn};

/// Walks back from `from_height` toward height 1 until it finds the
/// highest height where the node's block id matches the store's
/// main-chain block id at that height. Returns that height, or 0 if no
/// common ancestor is found within the stored range (full resync).
pub async fn find_fork_point(
    node: &NodeClient,
    pool: &PgPool,
    from_height: i64,
) -> Result<i64, PersistError> {
    let mut height = from_height;
    while height > 0 {
        let stored: Option<Block> = sqlx::query_as::<_, Block>(
            "SELECT id, header_id, parent_id, height, timestamp, difficulty, block_size, \
             block_coins, txs_count, txs_size, miner_address, main_chain, version, \
             transactions_root, state_root, pow_solutions \
             FROM blocks WHERE height = $1 AND main_chain = true",
        )
        .bind(height)
        .fetch_optional(pool)
        .await
        .map_err(PersistError::classify)?;

        let Some(stored_block) = stored else {
            height -= 1;
            continue;
        };

        match node.get_block_ids_at_height(height).await {
            Ok(ids) if ids.iter().any(|id| id == &stored_block.id) => return Ok(height),
            Ok(_) => height -= 1,
            Err(e) => {
                warn!(height, error = %e, "node unavailable while searching for fork point");
                height -= 1;
            }
        }
    }
    Ok(0)
}

/// Soft-deletes every main-chain block above `fork_height` and resets
/// the durable cursor, inside one transaction.
pub async fn rollback_to(pool: &PgPool, fork_height: i64) -> Result<u64, PersistError> {
    let mut tx = pool.begin().await.map_err(PersistError::from)?;

    let result = sqlx::query("UPDATE blocks SET main_chain = false WHERE height > $1 AND main_chain = true")
        .bind(fork_height)
        .execute(&mut *tx)
        .await
        .map_err(PersistError::classify)?;

    sqlx::query(
        "UPDATE transactions SET main_chain = false WHERE inclusion_height > $1 AND main_chain = true",
    )
    .bind(fork_height)
    .execute(&mut *tx)
    .await
    .map_err(PersistError::classify)?;

    crate::db::sync_status::reset_to(&mut tx, fork_height)
        .await
        .map_err(PersistError::classify)?;

    tx.commit().await.map_err(PersistError::classify)?;

    REORGS_HANDLED.inc();
    Ok(result.rows_affected())
}

/// Checks whether the node's block at `height` disagrees with the
/// store's main-chain block at that height; if so, runs the full
/// walk-back + rollback and returns the new (lower) cursor height to
/// resume forward ingestion from.
pub async fn detect_and_handle(
    node: &NodeClient,
    pool: &PgPool,
    height: i64,
) -> Result<Option<i64>, PersistError> {
    let stored: Option<Block> = sqlx::query_as::<_, Block>(
        "SELECT id, header_id, parent_id, height, timestamp, difficulty, block_size, \
         block_coins, txs_count, txs_size, miner_address, main_chain, version, \
         transactions_root, state_root, pow_solutions \
         FROM blocks WHERE height = $1 AND main_chain = true",
    )
    .bind(height)
    .fetch_optional(pool)
    .await
    .map_err(PersistError::classify)?;

    let Some(stored_block) = stored else {
        return Ok(None);
    };

    let node_ids = match node.get_block_ids_at_height(height).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(height, error = %e, "node unavailable during reorg check, skipping this tick");
            return Ok(None);
        }
    };

    if node_ids.iter().any(|id| id == &stored_block.id) {
        return Ok(None);
    }

    warn!(height, stored_id = %stored_block.id, "reorg detected");
    let fork_height = find_fork_point(node, pool, height.saturating_sub(1)).await?;
    let orphaned = rollback_to(pool, fork_height).await?;
    info!(fork_height, orphaned, "reorg resolved");
    Ok(Some(fork_height))
}

#[cfg(test)]
mod tests {
    // Behavioral coverage for find_fork_point/rollback_to/detect_and_handle
    // needs a live node + Postgres and lives in integration tests; unit
    // tests here stay limited to pure logic (see DESIGN.md).
}
