/// Bulk-insert primitives: chunk rows into batches of ~500, insert each
/// chunk as a single multi-row statement, and degrade to per-row inserts
/// when a chunk fails on a constraint violation.
use crate::error::PersistError;
use crate::metrics::BULK_INSERT_FALLBACKS;
use crate::model::{Asset, Block, Input, MiningReward, Output, Transaction};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction as PgTx};

pub const CHUNK_SIZE: usize = 500;

/// A reified tagged result for the fallback path: the caller always
/// gets one of these, never an exception-style short-circuit.
#[derive(Debug)]
pub enum InsertOutcome {
    BulkOk { inserted: usize },
    FellBackToRows { inserted: usize, skipped: usize },
    Fatal(PersistError),
}

macro_rules! chunked_bulk_insert {
    ($name:ident, $row:ty, $entity:expr, $push:expr, $solo:expr) => {
        pub async fn $name(
            tx: &mut PgTx<'_, Postgres>,
            rows: &[$row],
        ) -> InsertOutcome {
            if rows.is_empty() {
                return InsertOutcome::BulkOk { inserted: 0 };
            }

            let mut total_inserted = 0;
            let mut total_skipped = 0;
            for chunk in rows.chunks(CHUNK_SIZE) {
                match bulk_insert_chunk(tx, chunk, $push).await {
                    Ok(()) => total_inserted += chunk.len(),
                    Err(err) => {
                        let classified = PersistError::classify(err);
                        match classified {
                            PersistError::ConstraintViolation(_) => {
                                BULK_INSERT_FALLBACKS
                                    .with_label_values(&[$entity])
                                    .inc();
                                let (inserted, skipped) = fallback_per_row(tx, chunk, $solo).await;
                                total_inserted += inserted;
                                total_skipped += skipped;
                            }
                            fatal => return InsertOutcome::Fatal(fatal),
                        }
                    }
                }
            }

            if total_skipped == 0 {
                InsertOutcome::BulkOk {
                    inserted: total_inserted,
                }
            } else {
                InsertOutcome::FellBackToRows {
                    inserted: total_inserted,
                    skipped: total_skipped,
                }
            }
        }
    };
}

async fn bulk_insert_chunk<T>(
    tx: &mut PgTx<'_, Postgres>,
    chunk: &[T],
    push: fn(&mut QueryBuilder<Postgres>, &[T]),
) -> Result<(), sqlx::Error> {
    let mut builder = QueryBuilder::new("");
    push(&mut builder, chunk);
    builder.build().execute(&mut **tx).await.map(|_| ())
}

async fn fallback_per_row<T>(
    tx: &mut PgTx<'_, Postgres>,
    chunk: &[T],
    insert_one: fn(&mut QueryBuilder<Postgres>, &T),
) -> (usize, usize) {
    let mut inserted = 0;
    let mut skipped = 0;
    for row in chunk {
        let mut builder = QueryBuilder::new("");
        insert_one(&mut builder, row);
        match builder.build().execute(&mut **tx).await {
            Ok(_) => inserted += 1,
            Err(e) => {
                tracing::warn!(error = %e, "row-level insert skipped after constraint violation");
                skipped += 1;
            }
        }
    }
    (inserted, skipped)
}

fn push_blocks(builder: &mut QueryBuilder<Postgres>, rows: &[Block]) {
    builder.push(
        "INSERT INTO blocks (id, header_id, parent_id, height, timestamp, difficulty, \
         block_size, block_coins, txs_count, txs_size, miner_address, main_chain, version, \
         transactions_root, state_root, pow_solutions) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(&row.id)
            .push_bind(&row.header_id)
            .push_bind(&row.parent_id)
            .push_bind(row.height)
            .push_bind(row.timestamp)
            .push_bind(row.difficulty)
            .push_bind(row.block_size)
            .push_bind(row.block_coins)
            .push_bind(row.txs_count)
            .push_bind(row.txs_size)
            .push_bind(&row.miner_address)
            .push_bind(row.main_chain)
            .push_bind(row.version)
            .push_bind(&row.transactions_root)
            .push_bind(&row.state_root)
            .push_bind(&row.pow_solutions);
    });
    builder.push(" ON CONFLICT (id) DO NOTHING");
}

fn push_one_block(builder: &mut QueryBuilder<Postgres>, row: &Block) {
    push_blocks(builder, std::slice::from_ref(row));
}

fn push_transactions(builder: &mut QueryBuilder<Postgres>, rows: &[Transaction]) {
    builder.push(
        "INSERT INTO transactions (id, block_id, header_id, inclusion_height, timestamp, \
         index, main_chain, size, fee) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(&row.id)
            .push_bind(&row.block_id)
            .push_bind(&row.header_id)
            .push_bind(row.inclusion_height)
            .push_bind(row.timestamp)
            .push_bind(row.index)
            .push_bind(row.main_chain)
            .push_bind(row.size)
            .push_bind(row.fee);
    });
    builder.push(" ON CONFLICT (id) DO NOTHING");
}

fn push_one_transaction(builder: &mut QueryBuilder<Postgres>, row: &Transaction) {
    push_transactions(builder, std::slice::from_ref(row));
}

fn push_inputs(builder: &mut QueryBuilder<Postgres>, rows: &[Input]) {
    builder.push("INSERT INTO inputs (box_id, tx_id, index_in_tx, proof_bytes, extension) ");
    builder.push_values(rows, |mut b, row| {
        b.push_bind(&row.box_id)
            .push_bind(&row.tx_id)
            .push_bind(row.index_in_tx)
            .push_bind(&row.proof_bytes)
            .push_bind(&row.extension);
    });
    builder.push(" ON CONFLICT (box_id, tx_id) DO NOTHING");
}

fn push_one_input(builder: &mut QueryBuilder<Postgres>, row: &Input) {
    push_inputs(builder, std::slice::from_ref(row));
}

fn push_outputs(builder: &mut QueryBuilder<Postgres>, rows: &[Output]) {
    builder.push(
        "INSERT INTO outputs (box_id, tx_id, index_in_tx, value, creation_height, address, \
         ergo_tree, additional_registers, spent_by_tx_id) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(&row.box_id)
            .push_bind(&row.tx_id)
            .push_bind(row.index_in_tx)
            .push_bind(row.value)
            .push_bind(row.creation_height)
            .push_bind(&row.address)
            .push_bind(&row.ergo_tree)
            .push_bind(&row.additional_registers)
            .push_bind(&row.spent_by_tx_id);
    });
    builder.push(" ON CONFLICT (box_id) DO NOTHING");
}

fn push_one_output(builder: &mut QueryBuilder<Postgres>, row: &Output) {
    push_outputs(builder, std::slice::from_ref(row));
}

fn push_assets(builder: &mut QueryBuilder<Postgres>, rows: &[Asset]) {
    builder.push(
        "INSERT INTO assets (box_id, index_in_outputs, token_id, amount, name, decimals) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(&row.box_id)
            .push_bind(row.index_in_outputs)
            .push_bind(&row.token_id)
            .push_bind(row.amount)
            .push_bind(&row.name)
            .push_bind(row.decimals);
    });
    builder.push(" ON CONFLICT (box_id, index_in_outputs) DO NOTHING");
}

fn push_one_asset(builder: &mut QueryBuilder<Postgres>, row: &Asset) {
    push_assets(builder, std::slice::from_ref(row));
}

fn push_mining_rewards(builder: &mut QueryBuilder<Postgres>, rows: &[MiningReward]) {
    builder.push(
        "INSERT INTO mining_rewards (block_id, reward_amount, fees_amount, miner_address) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(&row.block_id)
            .push_bind(row.reward_amount)
            .push_bind(row.fees_amount)
            .push_bind(&row.miner_address);
    });
    builder.push(" ON CONFLICT (block_id) DO NOTHING");
}

fn push_one_mining_reward(builder: &mut QueryBuilder<Postgres>, row: &MiningReward) {
    push_mining_rewards(builder, std::slice::from_ref(row));
}

chunked_bulk_insert!(bulk_insert_blocks, Block, "blocks", push_blocks, push_one_block);
chunked_bulk_insert!(
    bulk_insert_transactions,
    Transaction,
    "transactions",
    push_transactions,
    push_one_transaction
);
chunked_bulk_insert!(bulk_insert_inputs, Input, "inputs", push_inputs, push_one_input);
chunked_bulk_insert!(bulk_insert_outputs, Output, "outputs", push_outputs, push_one_output);
chunked_bulk_insert!(bulk_insert_assets, Asset, "assets", push_assets, push_one_asset);
chunked_bulk_insert!(
    bulk_insert_mining_rewards,
    MiningReward,
    "mining_rewards",
    push_mining_rewards,
    push_one_mining_reward
);

/// Marks an output spent in a second pass: the `spent_by_tx_id` cycle
/// between a transaction and the output it later spends is resolved by
/// updating it only after both the creating and spending transactions
/// already exist.
pub async fn mark_outputs_spent(
    tx: &mut PgTx<'_, Postgres>,
    spends: &[(String, String)],
) -> Result<u64, sqlx::Error> {
    let mut affected = 0;
    for (box_id, spending_tx_id) in spends {
        let result = sqlx::query("UPDATE outputs SET spent_by_tx_id = $1 WHERE box_id = $2")
            .bind(spending_tx_id)
            .bind(box_id)
            .execute(&mut **tx)
            .await?;
        affected += result.rows_affected();
    }
    Ok(affected)
}

/// Seeds a bare `token_info` row (null name/decimals) the first time a
/// token_id is observed in an asset; a no-op on repeat sightings.
pub async fn seed_token_info(
    tx: &mut PgTx<'_, Postgres>,
    token_ids: &[(String, i64)],
) -> Result<(), sqlx::Error> {
    for (token_id, height) in token_ids {
        sqlx::query(
            "INSERT INTO token_info (token_id, first_seen_height) VALUES ($1, $2) \
             ON CONFLICT (token_id) DO NOTHING",
        )
        .bind(token_id)
        .bind(height)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Upserts one row per observed address: created on first observation,
/// `last_active_time`/classification kept current on every later one.
pub async fn upsert_address_stats(
    pool: &PgPool,
    address: &str,
    timestamp: i64,
    address_type: &str,
    script_complexity: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO address_stats (address, first_active_time, last_active_time, address_type, script_complexity)
        VALUES ($1, $2, $2, $3, $4)
        ON CONFLICT (address) DO UPDATE SET
            last_active_time = EXCLUDED.last_active_time,
            address_type = EXCLUDED.address_type,
            script_complexity = EXCLUDED.script_complexity
        "#,
    )
    .bind(address)
    .bind(timestamp)
    .bind(address_type)
    .bind(script_complexity)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_is_five_hundred_rows() {
        assert_eq!(CHUNK_SIZE, 500);
    }
}
