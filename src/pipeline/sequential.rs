/// The sequential path: fetch, validate, then commit a single block
/// inside one database transaction. Used for the sequential prefix of
/// every window, for solo fallback after ordering guard/failure-cascade
/// demotion, and for the whole window when the batch is a single block
/// or parallel mode is disabled.
use crate::db::bulk::{
    bulk_insert_assets, bulk_insert_blocks, bulk_insert_inputs, bulk_insert_mining_rewards,
    bulk_insert_outputs, bulk_insert_transactions, mark_outputs_spent, seed_token_info,
    upsert_address_stats, InsertOutcome,
};
use crate::db::sync_status;
use crate::error::{NodeError, PersistError, PipelineError, TransformError};
use crate::metrics::{
    BLOCKS_PROCESSED, DB_COMMIT_DURATION, OUTPUTS_CREATED, OUTPUTS_SPENT,
    TRANSACTIONS_PROCESSED,
};
use crate::model::BlockMappings;
use crate::node::NodeClient;
use crate::transform::{classify_address_for_upsert, transform};
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

/// Fetches values for boxes spent by this block's inputs, from already
/// committed Output rows. Unresolved ids are simply absent from the map,
/// which `transform` treats as "unknown input value" (fee falls back to 0).
pub(crate) async fn resolve_known_output_values(
    pool: &PgPool,
    box_ids: &[String],
) -> Result<HashMap<String, i64>, sqlx::Error> {
    if box_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT box_id, value FROM outputs WHERE box_id = ANY($1)")
            .bind(box_ids)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}

pub(crate) fn collect_input_box_ids(raw: &crate::node::RawBlock) -> Vec<String> {
    raw.block_transactions
        .get("transactions")
        .and_then(serde_json::Value::as_array)
        .map(|txs| {
            txs.iter()
                .skip(1) // coinbase has no real inputs
                .filter_map(|tx| tx.get("inputs").and_then(serde_json::Value::as_array))
                .flatten()
                .filter_map(|input| input.get("boxId").and_then(serde_json::Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Commits one block atomically, path label `"sequential"` or
/// `"solo_fallback"` depending on the caller's context (used only for
/// the metric, the transactional behavior is identical).
pub async fn commit_block(
    pool: &PgPool,
    mappings: BlockMappings,
    path_label: &'static str,
) -> Result<(), PipelineError> {
    let block = mappings
        .block
        .ok_or_else(|| TransformError::MalformedBlock("empty mappings".to_string()))?;
    let height = block.height;

    let started = Instant::now();
    let mut tx = crate::db::pool::with_session(pool)
        .await
        .map_err(PersistError::from)?;

    let outcome = bulk_insert_blocks(&mut tx, std::slice::from_ref(&block)).await;
    fail_on_fatal(outcome)?;

    if let Some(reward) = &mappings.mining_reward {
        let outcome = bulk_insert_mining_rewards(&mut tx, std::slice::from_ref(reward)).await;
        fail_on_fatal(outcome)?;
    }

    let outcome = bulk_insert_transactions(&mut tx, &mappings.transactions).await;
    fail_on_fatal(outcome)?;
    TRANSACTIONS_PROCESSED.inc_by(mappings.transactions.len() as u64);

    let outcome = bulk_insert_inputs(&mut tx, &mappings.inputs).await;
    fail_on_fatal(outcome)?;

    let outcome = bulk_insert_outputs(&mut tx, &mappings.outputs).await;
    fail_on_fatal(outcome)?;
    OUTPUTS_CREATED.inc_by(mappings.outputs.len() as u64);

    let outcome = bulk_insert_assets(&mut tx, &mappings.assets).await;
    fail_on_fatal(outcome)?;

    if !mappings.assets.is_empty() {
        let token_ids: Vec<(String, i64)> = mappings
            .assets
            .iter()
            .map(|a| (a.token_id.clone(), height))
            .collect();
        seed_token_info(&mut tx, &token_ids)
            .await
            .map_err(PersistError::classify)?;
    }

    let spends: Vec<(String, String)> = mappings
        .inputs
        .iter()
        .map(|i| (i.box_id.clone(), i.tx_id.clone()))
        .collect();
    let spent = mark_outputs_spent(&mut tx, &spends)
        .await
        .map_err(PersistError::classify)?;
    OUTPUTS_SPENT.inc_by(spent);

    sync_status::advance(&mut tx, height)
        .await
        .map_err(PersistError::classify)?;

    tx.commit().await.map_err(PersistError::classify)?;

    DB_COMMIT_DURATION
        .with_label_values(&[path_label])
        .observe(started.elapsed().as_secs_f64());
    BLOCKS_PROCESSED.with_label_values(&[path_label]).inc();

    for observation in &mappings.address_observations {
        let (address_type, script_complexity) =
            classify_address_for_upsert(&observation.ergo_tree);
        if let Err(e) = upsert_address_stats(
            pool,
            &observation.address,
            observation.timestamp,
            address_type,
            script_complexity,
        )
        .await
        {
            warn!(error = %e, address = %observation.address, "address stats upsert failed");
        }
    }

    info!(height, path = path_label, "block committed");
    Ok(())
}

fn fail_on_fatal(outcome: InsertOutcome) -> Result<(), PipelineError> {
    match outcome {
        InsertOutcome::BulkOk { .. } => Ok(()),
        InsertOutcome::FellBackToRows { skipped, .. } if skipped > 0 => {
            warn!(skipped, "bulk insert fallback skipped rows after constraint violation");
            Ok(())
        }
        InsertOutcome::FellBackToRows { .. } => Ok(()),
        InsertOutcome::Fatal(err) => Err(PipelineError::Persist(err)),
    }
}

/// Fetches, validates and commits height `h` end-to-end. Rolls back (no
/// cursor advance) on any failure.
pub async fn process_height(
    node: &NodeClient,
    pool: &PgPool,
    height: i64,
    path_label: &'static str,
) -> Result<(), PipelineError> {
    let raw = node
        .get_block_by_height(height)
        .await
        .map_err(|e| match e {
            NodeError::NotFound => PipelineError::Node(NodeError::NotFound),
            other => PipelineError::Node(other),
        })?;

    let box_ids = collect_input_box_ids(&raw);
    let known_values = resolve_known_output_values(pool, &box_ids)
        .await
        .map_err(PersistError::classify)?;

    let mappings = transform(&raw, &known_values)?;
    commit_block(pool, mappings, path_label).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_input_box_ids_skips_coinbase() {
        let raw = crate::node::RawBlock {
            header: serde_json::json!({}),
            block_transactions: serde_json::json!({
                "transactions": [
                    {"id": "coinbase", "inputs": [{"boxId": "ignored"}], "outputs": []},
                    {"id": "tx2", "inputs": [{"boxId": "box1"}, {"boxId": "box2"}], "outputs": []}
                ]
            }),
            height: Some(2),
        };
        let ids = collect_input_box_ids(&raw);
        assert_eq!(ids, vec!["box1".to_string(), "box2".to_string()]);
    }
}
