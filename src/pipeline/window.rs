/// The parallel path for a height window: a sequential prefix
/// establishing referential context, followed by a producer/consumer
/// pipeline (fetcher pool -> bounded queue -> processor pool with
/// mini-batch accumulation) for the remainder.
use crate::config::IndexerConfig;
use crate::db::bulk::{
    bulk_insert_assets, bulk_insert_blocks, bulk_insert_inputs, bulk_insert_mining_rewards,
    bulk_insert_outputs, bulk_insert_transactions, mark_outputs_spent, seed_token_info,
    upsert_address_stats, InsertOutcome,
};
use crate::db::sync_status;
use crate::error::PersistError;
use crate::metrics::{
    BLOCKS_PROCESSED, CONSECUTIVE_BATCH_FAILURES, DB_COMMIT_DURATION, OUTPUTS_CREATED,
    OUTPUTS_SPENT, QUEUE_DEPTH, TRANSACTIONS_PROCESSED,
};
use crate::model::BlockMappings;
use crate::node::{NodeClient, RawBlock};
use crate::pipeline::sequential;
use crate::transform::{classify_address_for_upsert, transform};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{info, warn};

const MINI_BATCH_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONSECUTIVE_BATCH_FAILURES: usize = 3;

struct SharedWindowState {
    /// Highest height this run believes is durably committed; seeds the
    /// ordering guard and is advanced as mini-batches and solo commits land.
    last_durable: AtomicI64,
    consecutive_batch_failures: AtomicUsize,
    /// Set once the 3-failure threshold is hit; cleared after the
    /// processor pool finishes the window in individual mode.
    force_individual: AtomicBool,
    queue_depth: AtomicI64,
}

/// Runs the sequential prefix, then the pipelined tail, for the window
/// `(window_start, window_end]`. Returns the highest height committed.
pub async fn run_window(
    node: Arc<NodeClient>,
    pool: sqlx::PgPool,
    cfg: &IndexerConfig,
    window_start: i64,
    window_end: i64,
) -> i64 {
    let mut cursor = window_start;
    let sequential_end = (window_start + cfg.sequential_steps).min(window_end);

    for h in (window_start + 1)..=sequential_end {
        match sequential::process_height(&node, &pool, h, "sequential").await {
            Ok(()) => cursor = h,
            Err(e) => {
                warn!(height = h, error = %e, "sequential prefix block failed, stopping window early");
                return cursor;
            }
        }
    }

    if sequential_end >= window_end {
        return cursor;
    }

    run_pipelined_tail(node, pool, cfg, sequential_end + 1, window_end, cursor).await
}

async fn run_pipelined_tail(
    node: Arc<NodeClient>,
    pool: sqlx::PgPool,
    cfg: &IndexerConfig,
    tail_start: i64,
    tail_end: i64,
    seed_durable: i64,
) -> i64 {
    let batch_size = (tail_end - tail_start + 1).max(1);
    let queue_capacity = (2 * batch_size).max(1) as usize;
    let (tx, rx) = mpsc::channel::<RawBlock>(queue_capacity);
    let rx = Arc::new(Mutex::new(rx));

    let state = Arc::new(SharedWindowState {
        last_durable: AtomicI64::new(seed_durable),
        consecutive_batch_failures: AtomicUsize::new(0),
        force_individual: AtomicBool::new(false),
        queue_depth: AtomicI64::new(0),
    });

    let fetch_batch_size = cfg.fetch_batch_size.min(20).max(1);
    let fetcher_sem = Arc::new(Semaphore::new(cfg.fetcher_workers.max(1)));
    let mut fetcher_handles = Vec::new();
    let mut next = tail_start;
    while next <= tail_end {
        let chunk_end = (next + fetch_batch_size - 1).min(tail_end);
        let node = node.clone();
        let tx = tx.clone();
        let sem = fetcher_sem.clone();
        let state = state.clone();
        let (chunk_start, chunk_end_owned) = (next, chunk_end);
        fetcher_handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("fetcher semaphore closed");
            let depth = state.queue_depth.load(Ordering::Relaxed);
            let high_water = (1.5 * batch_size as f64) as i64;
            if depth > high_water {
                let sleep_ms = (depth.saturating_sub(high_water) * 50).min(2000);
                tokio::time::sleep(Duration::from_millis(sleep_ms as u64)).await;
            }
            match node.get_blocks_in_range(chunk_start, chunk_end_owned).await {
                Ok(mut blocks) => {
                    blocks.sort_by_key(|b| b.height.unwrap_or(0));
                    for block in blocks {
                        state.queue_depth.fetch_add(1, Ordering::Relaxed);
                        QUEUE_DEPTH.set(state.queue_depth.load(Ordering::Relaxed));
                        if tx.send(block).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(chunk_start, chunk_end_owned, error = %e, "fetcher chunk failed");
                }
            }
        }));
        next = chunk_end + 1;
    }
    drop(tx);

    let mut processor_handles = Vec::new();
    for _ in 0..cfg.processor_workers.max(1) {
        let rx = rx.clone();
        let pool = pool.clone();
        let state = state.clone();
        let db_batch_size = cfg.db_batch_size.min(5).max(1);
        processor_handles.push(tokio::spawn(async move {
            run_processor(rx, pool, state, db_batch_size).await;
        }));
    }

    for handle in fetcher_handles {
        let _ = handle.await;
    }
    for handle in processor_handles {
        let _ = handle.await;
    }

    state.last_durable.load(Ordering::Relaxed)
}

async fn run_processor(
    rx: Arc<Mutex<mpsc::Receiver<RawBlock>>>,
    pool: sqlx::PgPool,
    state: Arc<SharedWindowState>,
    db_batch_size: usize,
) {
    let mut mini_batch: Vec<RawBlock> = Vec::with_capacity(db_batch_size);
    let mut processed: HashSet<i64> = HashSet::new();
    let mut last_activity = Instant::now();

    loop {
        let next_block = {
            let mut guard = rx.lock().await;
            tokio::time::timeout(MINI_BATCH_INACTIVITY_TIMEOUT, guard.recv()).await
        };

        match next_block {
            Ok(Some(block)) => {
                state.queue_depth.fetch_sub(1, Ordering::Relaxed);
                QUEUE_DEPTH.set(state.queue_depth.load(Ordering::Relaxed));
                let height = block.height.unwrap_or(0);
                last_activity = Instant::now();

                let force_individual = state.force_individual.load(Ordering::Relaxed);
                let last_durable = state.last_durable.load(Ordering::Relaxed);
                let admits_to_batch =
                    admits_to_mini_batch(height, last_durable, force_individual, &processed);

                if !admits_to_batch {
                    flush_mini_batch(&pool, &state, &mut mini_batch, &mut processed).await;
                    commit_solo(&pool, &state, block).await;
                    continue;
                }

                mini_batch.push(block);
                if mini_batch.len() >= db_batch_size {
                    flush_mini_batch(&pool, &state, &mut mini_batch, &mut processed).await;
                }
            }
            Ok(None) => {
                flush_mini_batch(&pool, &state, &mut mini_batch, &mut processed).await;
                return;
            }
            Err(_elapsed) => {
                if !mini_batch.is_empty() && last_activity.elapsed() >= MINI_BATCH_INACTIVITY_TIMEOUT {
                    flush_mini_batch(&pool, &state, &mut mini_batch, &mut processed).await;
                }
            }
        }
    }
}

async fn commit_solo(pool: &sqlx::PgPool, state: &SharedWindowState, block: RawBlock) {
    let height = block.height.unwrap_or(0);
    let box_ids = sequential::collect_input_box_ids(&block);
    let known_values = match sequential::resolve_known_output_values(pool, &box_ids).await {
        Ok(values) => values,
        Err(e) => {
            warn!(height, error = %e, "failed to resolve input values for solo commit");
            HashMap::new()
        }
    };
    match transform(&block, &known_values) {
        Ok(mappings) => match sequential::commit_block(pool, mappings, "solo_fallback").await {
            Ok(()) => bump_durable(state, height),
            Err(e) => warn!(height, error = %e, "solo commit failed, will retry next tick"),
        },
        Err(e) => warn!(height, error = %e, "malformed block dropped from window"),
    }
}

fn bump_durable(state: &SharedWindowState, height: i64) {
    let previous = state.last_durable.fetch_max(height, Ordering::Relaxed);
    if height > previous {
        info!(height, "durable cursor advanced via solo path");
    }
}

/// The ordering guard: a block admits to the current mini-batch only if
/// its parent height is already durable or already committed earlier in
/// this run, and the processor hasn't been forced into individual mode
/// by the failure cascade. Pulled out as a pure function so the
/// out-of-order-arrival and failure-cascade scenarios can be tested
/// without a database or a running pipeline.
fn admits_to_mini_batch(
    height: i64,
    last_durable: i64,
    force_individual: bool,
    processed: &HashSet<i64>,
) -> bool {
    !force_individual && (height <= last_durable + 1 || processed.contains(&(height - 1)))
}

/// Sorts the accumulated blocks by height, transforms each, and commits
/// the whole mini-batch in one transaction. On transaction failure, the
/// failure cascade demotes every block in the batch to the sequential
/// path instead.
async fn flush_mini_batch(
    pool: &sqlx::PgPool,
    state: &Arc<SharedWindowState>,
    mini_batch: &mut Vec<RawBlock>,
    processed: &mut HashSet<i64>,
) {
    if mini_batch.is_empty() {
        return;
    }
    let mut batch = std::mem::take(mini_batch);
    batch.sort_by_key(|b| b.height.unwrap_or(0));

    if state.force_individual.load(Ordering::Relaxed) {
        demote_batch_to_sequential(pool, state, batch, processed).await;
        return;
    }

    match commit_mini_batch(pool, &batch).await {
        Ok(max_height) => {
            bump_durable(state, max_height);
            for block in &batch {
                processed.insert(block.height.unwrap_or(0));
            }
            state.consecutive_batch_failures.store(0, Ordering::Relaxed);
        }
        Err(e) => {
            warn!(error = %e, batch_len = batch.len(), "mini-batch transaction failed, falling back to per-block");
            let failures = state.consecutive_batch_failures.fetch_add(1, Ordering::Relaxed) + 1;
            CONSECUTIVE_BATCH_FAILURES.set(failures as i64);
            if failures >= MAX_CONSECUTIVE_BATCH_FAILURES {
                warn!(failures, "switching processor to individual mode for rest of window");
                state.force_individual.store(true, Ordering::Relaxed);
            }
            demote_batch_to_sequential(pool, state, batch, processed).await;
        }
    }
}

async fn demote_batch_to_sequential(
    pool: &sqlx::PgPool,
    state: &Arc<SharedWindowState>,
    batch: Vec<RawBlock>,
    processed: &mut HashSet<i64>,
) {
    for block in batch {
        let height = block.height.unwrap_or(0);
        commit_solo(pool, state, block).await;
        processed.insert(height);
    }
}

/// Inserts a whole mini-batch per-entity (all Blocks, then all
/// Transactions, Inputs, Outputs, Assets, MiningRewards) in a single
/// transaction, so every foreign-key target exists before its
/// dependents.
async fn commit_mini_batch(pool: &sqlx::PgPool, batch: &[RawBlock]) -> Result<i64, PersistError> {
    let mut all_mappings: Vec<BlockMappings> = Vec::with_capacity(batch.len());
    // Same-batch spends resolve against outputs produced earlier in this
    // mini-batch; spends of outputs committed before this window started
    // are looked up in the already-committed `outputs` table, exactly as
    // the sequential path does, so fee is never silently zeroed just
    // because a spend crosses a batch boundary.
    let box_ids: Vec<String> = batch.iter().flat_map(sequential::collect_input_box_ids).collect();
    let mut known_values = sequential::resolve_known_output_values(pool, &box_ids)
        .await
        .map_err(PersistError::classify)?;
    for raw in batch {
        let mappings = transform(raw, &known_values)
            .map_err(|e| PersistError::ConstraintViolation(e.to_string()))?;
        for output in &mappings.outputs {
            known_values.insert(output.box_id.clone(), output.value);
        }
        all_mappings.push(mappings);
    }

    let started = Instant::now();
    let mut tx = crate::db::pool::with_batch_transaction(pool, batch.len())
        .await
        .map_err(PersistError::from)?;

    let blocks: Vec<_> = all_mappings.iter().filter_map(|m| m.block.clone()).collect();
    let max_height = blocks.iter().map(|b| b.height).max().unwrap_or(0);
    fail_fatal(bulk_insert_blocks(&mut tx, &blocks).await)?;

    let rewards: Vec<_> = all_mappings.iter().filter_map(|m| m.mining_reward.clone()).collect();
    fail_fatal(bulk_insert_mining_rewards(&mut tx, &rewards).await)?;

    let transactions: Vec<_> = all_mappings.iter().flat_map(|m| m.transactions.clone()).collect();
    fail_fatal(bulk_insert_transactions(&mut tx, &transactions).await)?;
    TRANSACTIONS_PROCESSED.inc_by(transactions.len() as u64);

    let inputs: Vec<_> = all_mappings.iter().flat_map(|m| m.inputs.clone()).collect();
    fail_fatal(bulk_insert_inputs(&mut tx, &inputs).await)?;

    let outputs: Vec<_> = all_mappings.iter().flat_map(|m| m.outputs.clone()).collect();
    fail_fatal(bulk_insert_outputs(&mut tx, &outputs).await)?;
    OUTPUTS_CREATED.inc_by(outputs.len() as u64);

    let assets: Vec<_> = all_mappings.iter().flat_map(|m| m.assets.clone()).collect();
    fail_fatal(bulk_insert_assets(&mut tx, &assets).await)?;

    let token_ids: Vec<(String, i64)> = all_mappings
        .iter()
        .flat_map(|m| {
            let height = m.block.as_ref().map(|b| b.height).unwrap_or(0);
            m.assets.iter().map(move |a| (a.token_id.clone(), height))
        })
        .collect();
    if !token_ids.is_empty() {
        seed_token_info(&mut tx, &token_ids)
            .await
            .map_err(PersistError::classify)?;
    }

    let spends: Vec<(String, String)> =
        inputs.iter().map(|i| (i.box_id.clone(), i.tx_id.clone())).collect();
    let spent = mark_outputs_spent(&mut tx, &spends)
        .await
        .map_err(PersistError::classify)?;
    OUTPUTS_SPENT.inc_by(spent);

    sync_status::advance(&mut tx, max_height)
        .await
        .map_err(PersistError::classify)?;

    tx.commit().await.map_err(PersistError::classify)?;

    DB_COMMIT_DURATION
        .with_label_values(&["mini_batch"])
        .observe(started.elapsed().as_secs_f64());
    BLOCKS_PROCESSED
        .with_label_values(&["mini_batch"])
        .inc_by(blocks.len() as u64);

    for mappings in &all_mappings {
        for observation in &mappings.address_observations {
            let (address_type, script_complexity) =
                classify_address_for_upsert(&observation.ergo_tree);
            let _ = upsert_address_stats(
                pool,
                &observation.address,
                observation.timestamp,
                address_type,
                script_complexity,
            )
            .await;
        }
    }

    Ok(max_height)
}

fn fail_fatal(outcome: InsertOutcome) -> Result<(), PersistError> {
    match outcome {
        InsertOutcome::BulkOk { .. } | InsertOutcome::FellBackToRows { .. } => Ok(()),
        InsertOutcome::Fatal(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_height_admits_to_batch() {
        let processed = HashSet::new();
        assert!(admits_to_mini_batch(11, 10, false, &processed));
    }

    #[test]
    fn out_of_order_arrival_admits_once_parent_processed_this_run() {
        // Heights 3, 5, 4 arrive in that order. 5 arrives before 4 has
        // committed anywhere, so it must NOT admit to the batch yet...
        let mut processed: HashSet<i64> = HashSet::new();
        processed.insert(3);
        assert!(!admits_to_mini_batch(5, 3, false, &processed));

        // ...but once 4 has been processed (solo or batch), 5 admits.
        processed.insert(4);
        assert!(admits_to_mini_batch(5, 3, false, &processed));
    }

    #[test]
    fn gap_beyond_durable_and_unprocessed_parent_is_rejected() {
        let processed = HashSet::new();
        assert!(!admits_to_mini_batch(12, 10, false, &processed));
    }

    #[test]
    fn force_individual_rejects_everything_regardless_of_height() {
        let mut processed = HashSet::new();
        processed.insert(10);
        assert!(!admits_to_mini_batch(11, 10, true, &processed));
    }
}
