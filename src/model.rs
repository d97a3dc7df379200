/// Value types for the indexer's relational data model.
///
/// These are plain structs, not ORM-mapped classes: `transform` produces
/// them, `db::bulk` inserts them, `db::queries` reads them back for the
/// API. No row type carries behavior beyond simple accessors.
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Block {
    pub id: String,
    pub header_id: String,
    pub parent_id: Option<String>,
    pub height: i64,
    pub timestamp: i64,
    pub difficulty: i64,
    pub block_size: i64,
    pub block_coins: i64,
    pub txs_count: i32,
    pub txs_size: i64,
    pub miner_address: Option<String>,
    pub main_chain: bool,
    pub version: i32,
    pub transactions_root: Option<String>,
    pub state_root: Option<String>,
    pub pow_solutions: Option<Json>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: String,
    pub block_id: String,
    pub header_id: String,
    pub inclusion_height: i64,
    pub timestamp: i64,
    pub index: i32,
    pub main_chain: bool,
    pub size: i64,
    pub fee: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Input {
    pub box_id: String,
    pub tx_id: String,
    pub index_in_tx: i32,
    pub proof_bytes: Option<String>,
    pub extension: Option<Json>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Output {
    pub box_id: String,
    pub tx_id: String,
    pub index_in_tx: i32,
    pub value: i64,
    pub creation_height: i64,
    pub address: Option<String>,
    pub ergo_tree: String,
    pub additional_registers: Option<Json>,
    pub spent_by_tx_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Asset {
    pub box_id: String,
    pub index_in_outputs: i32,
    pub token_id: String,
    pub amount: i64,
    pub name: Option<String>,
    pub decimals: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MiningReward {
    pub block_id: String,
    pub reward_amount: i64,
    pub fees_amount: i64,
    pub miner_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AddressStats {
    pub address: String,
    pub first_active_time: Option<i64>,
    pub last_active_time: Option<i64>,
    pub address_type: Option<String>,
    pub script_complexity: Option<i32>,
}

/// A bare token-metadata cache row: seeded with null name/decimals the
/// first time a token_id is observed in an asset, never populated
/// further by the indexer itself.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TokenInfo {
    pub token_id: String,
    pub name: Option<String>,
    pub decimals: Option<i32>,
    pub first_seen_height: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncStatus {
    pub current_height: i64,
    pub target_height: i64,
    pub is_syncing: bool,
    pub last_block_time: Option<i64>,
}

impl SyncStatus {
    pub fn zero() -> Self {
        Self {
            current_height: 0,
            target_height: 0,
            is_syncing: false,
            last_block_time: None,
        }
    }
}

/// An `(address, timestamp, ergo_tree)` observation emitted by the
/// transformer for every address it sees in a block's outputs; the
/// pipeline folds these into `AddressStats` upserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressObservation {
    pub address: String,
    pub timestamp: i64,
    pub ergo_tree: String,
}

/// The full set of row mappings the transformer produces for one block.
#[derive(Debug, Clone, Default)]
pub struct BlockMappings {
    pub block: Option<Block>,
    pub transactions: Vec<Transaction>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub assets: Vec<Asset>,
    pub mining_reward: Option<MiningReward>,
    pub address_observations: Vec<AddressObservation>,
}
