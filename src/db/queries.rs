/// Read-only queries backing the thin HTTP API. Balances are computed
/// as `Σ value WHERE address = ? AND spent_by_tx_id IS NULL`, joined
/// against `transactions` to exclude outputs created by orphaned
/// (non-main-chain) blocks — the UTXO set.
use crate::model::{Block, SyncStatus, Transaction};
use sqlx::PgPool;

pub async fn get_sync_status(pool: &PgPool) -> Result<SyncStatus, sqlx::Error> {
    sqlx::query_as::<_, SyncStatus>(
        "SELECT current_height, target_height, is_syncing, last_block_time FROM sync_status WHERE id = 1",
    )
    .fetch_one(pool)
    .await
}

pub async fn get_block_by_height(pool: &PgPool, height: i64) -> Result<Option<Block>, sqlx::Error> {
    sqlx::query_as::<_, Block>(
        "SELECT id, header_id, parent_id, height, timestamp, difficulty, block_size, \
         block_coins, txs_count, txs_size, miner_address, main_chain, version, \
         transactions_root, state_root, pow_solutions \
         FROM blocks WHERE height = $1 AND main_chain = true",
    )
    .bind(height)
    .fetch_optional(pool)
    .await
}

pub async fn get_transaction_by_id(
    pool: &PgPool,
    tx_id: &str,
) -> Result<Option<Transaction>, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(
        "SELECT id, block_id, header_id, inclusion_height, timestamp, index, main_chain, \
         size, fee FROM transactions WHERE id = $1",
    )
    .bind(tx_id)
    .fetch_optional(pool)
    .await
}

#[derive(Debug, serde::Serialize)]
pub struct AddressBalance {
    pub address: String,
    pub balance: i64,
    pub utxo_count: i64,
}

pub async fn get_address_balance(
    pool: &PgPool,
    address: &str,
) -> Result<AddressBalance, sqlx::Error> {
    // Outputs carry no `main_chain` column of their own; reorg recovery
    // soft-deletes by flipping the creating transaction's `main_chain`
    // to false (reorg.rs), so an output from an orphaned block is
    // excluded here via its creating transaction rather than via a flag
    // on the output itself.
    let row: (Option<i64>, i64) = sqlx::query_as(
        "SELECT SUM(o.value), COUNT(*) FROM outputs o \
         JOIN transactions t ON t.id = o.tx_id \
         WHERE o.address = $1 AND o.spent_by_tx_id IS NULL AND t.main_chain = true",
    )
    .bind(address)
    .fetch_one(pool)
    .await?;

    Ok(AddressBalance {
        address: address.to_string(),
        balance: row.0.unwrap_or(0),
        utxo_count: row.1,
    })
}
