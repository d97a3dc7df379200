/// Table definitions: plain `CREATE TABLE` DDL executed at startup.
///
/// Wide hex ids are stored as `text`, amounts as `bigint`, schemaless
/// blobs as `jsonb`. `created_at` columns are kept on every table for
/// operational auditability. `token_info` is a bare metadata-cache
/// table: one row per token_id, seeded with null name/decimals by asset
/// ingestion, never populated further here — token-metadata fetching is
/// a derived-analytics feature this indexer doesn't attempt.
use sqlx::PgPool;

const CREATE_BLOCKS: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    id TEXT PRIMARY KEY,
    header_id TEXT NOT NULL,
    parent_id TEXT REFERENCES blocks(id),
    height BIGINT NOT NULL,
    timestamp BIGINT NOT NULL,
    difficulty BIGINT NOT NULL,
    block_size BIGINT NOT NULL,
    block_coins BIGINT NOT NULL,
    txs_count INTEGER NOT NULL,
    txs_size BIGINT NOT NULL,
    miner_address TEXT,
    main_chain BOOLEAN NOT NULL,
    version INTEGER NOT NULL,
    transactions_root TEXT,
    state_root TEXT,
    pow_solutions JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_TRANSACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    block_id TEXT NOT NULL REFERENCES blocks(id),
    header_id TEXT NOT NULL,
    inclusion_height BIGINT NOT NULL,
    timestamp BIGINT NOT NULL,
    index INTEGER NOT NULL,
    main_chain BOOLEAN NOT NULL,
    size BIGINT NOT NULL,
    fee BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_INPUTS: &str = r#"
CREATE TABLE IF NOT EXISTS inputs (
    box_id TEXT NOT NULL,
    tx_id TEXT NOT NULL REFERENCES transactions(id),
    index_in_tx INTEGER NOT NULL,
    proof_bytes TEXT,
    extension JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (box_id, tx_id)
)
"#;

const CREATE_OUTPUTS: &str = r#"
CREATE TABLE IF NOT EXISTS outputs (
    box_id TEXT PRIMARY KEY,
    tx_id TEXT NOT NULL REFERENCES transactions(id),
    index_in_tx INTEGER NOT NULL,
    value BIGINT NOT NULL,
    creation_height BIGINT NOT NULL,
    address TEXT,
    ergo_tree TEXT NOT NULL,
    additional_registers JSONB,
    spent_by_tx_id TEXT REFERENCES transactions(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_ASSETS: &str = r#"
CREATE TABLE IF NOT EXISTS assets (
    box_id TEXT NOT NULL REFERENCES outputs(box_id),
    index_in_outputs INTEGER NOT NULL,
    token_id TEXT NOT NULL,
    amount BIGINT NOT NULL,
    name TEXT,
    decimals INTEGER,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (box_id, index_in_outputs)
)
"#;

const CREATE_MINING_REWARDS: &str = r#"
CREATE TABLE IF NOT EXISTS mining_rewards (
    block_id TEXT PRIMARY KEY REFERENCES blocks(id),
    reward_amount BIGINT NOT NULL,
    fees_amount BIGINT NOT NULL,
    miner_address TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_ADDRESS_STATS: &str = r#"
CREATE TABLE IF NOT EXISTS address_stats (
    address TEXT PRIMARY KEY,
    first_active_time BIGINT,
    last_active_time BIGINT,
    address_type TEXT,
    script_complexity INTEGER,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_TOKEN_INFO: &str = r#"
CREATE TABLE IF NOT EXISTS token_info (
    token_id TEXT PRIMARY KEY,
    name TEXT,
    decimals INTEGER,
    first_seen_height BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_SYNC_STATUS: &str = r#"
CREATE TABLE IF NOT EXISTS sync_status (
    id INTEGER PRIMARY KEY DEFAULT 1,
    current_height BIGINT NOT NULL,
    target_height BIGINT NOT NULL,
    is_syncing BOOLEAN NOT NULL DEFAULT false,
    last_block_time BIGINT,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT sync_status_single_row CHECK (id = 1)
)
"#;

const CREATE_INDICES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_blocks_height ON blocks(height)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_block_id ON transactions(block_id)",
    "CREATE INDEX IF NOT EXISTS idx_outputs_address ON outputs(address)",
    "CREATE INDEX IF NOT EXISTS idx_outputs_spent_by_tx_id ON outputs(spent_by_tx_id)",
    "CREATE INDEX IF NOT EXISTS idx_assets_token_id ON assets(token_id)",
    "CREATE INDEX IF NOT EXISTS idx_inputs_box_id ON inputs(box_id)",
];

const DROP_ALL: &[&str] = &[
    "DROP TABLE IF EXISTS address_stats CASCADE",
    "DROP TABLE IF EXISTS token_info CASCADE",
    "DROP TABLE IF EXISTS mining_rewards CASCADE",
    "DROP TABLE IF EXISTS assets CASCADE",
    "DROP TABLE IF EXISTS inputs CASCADE",
    "DROP TABLE IF EXISTS outputs CASCADE",
    "DROP TABLE IF EXISTS transactions CASCADE",
    "DROP TABLE IF EXISTS blocks CASCADE",
    "DROP TABLE IF EXISTS sync_status CASCADE",
];

/// Creates tables and indices if absent. `reset` drops everything first
/// — backs the `reset-db` CLI subcommand and `RESET_DB=true`.
pub async fn init(pool: &PgPool, reset: bool) -> Result<(), sqlx::Error> {
    if reset {
        tracing::warn!("dropping all tables for database reset");
        for stmt in DROP_ALL {
            sqlx::query(stmt).execute(pool).await?;
        }
    }

    for stmt in [
        CREATE_BLOCKS,
        CREATE_TRANSACTIONS,
        CREATE_INPUTS,
        CREATE_OUTPUTS,
        CREATE_ASSETS,
        CREATE_MINING_REWARDS,
        CREATE_ADDRESS_STATS,
        CREATE_TOKEN_INFO,
        CREATE_SYNC_STATUS,
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }
    for stmt in CREATE_INDICES {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
