/// Pooled Postgres connection: pool size / overflow / recycle interval
/// and pre-ping are all configurable; session isolation defaults to
/// `READ COMMITTED`.
use crate::config::DatabaseConfig;
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction as PgTx};
use std::time::Duration;

/// A batch large enough that Postgres's default `work_mem` starts to
/// hurt the bulk `INSERT ... ON CONFLICT` sort/hash plans.
const LARGE_BATCH_THRESHOLD: usize = 50;

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let options: PgConnectOptions = config
        .connection_string()
        .parse()
        .map_err(|e: sqlx::Error| e)?;

    PgPoolOptions::new()
        .max_connections(config.pool_size + config.max_overflow)
        .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
        .max_lifetime(Duration::from_secs(config.pool_recycle_secs))
        .test_before_acquire(true)
        .connect_with(options)
        .await
}

/// Opens a plain transactional scope. Commit and rollback are the
/// caller's responsibility via the returned transaction's `commit()`/
/// drop.
pub async fn with_session(pool: &PgPool) -> Result<PgTx<'_, Postgres>, sqlx::Error> {
    pool.begin().await
}

/// A session-scoped transaction tuned for multi-block mini-batch
/// commits. Sets `READ COMMITTED` isolation explicitly and, for batches
/// above `LARGE_BATCH_THRESHOLD` blocks, raises `work_mem` for the
/// duration of the transaction only (`SET LOCAL`, reverted automatically
/// at commit/rollback).
pub async fn with_batch_transaction(
    pool: &PgPool,
    block_count: usize,
) -> Result<PgTx<'_, Postgres>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
        .execute(&mut *tx)
        .await?;
    if block_count > LARGE_BATCH_THRESHOLD {
        sqlx::query("SET LOCAL work_mem = '256MB'")
            .execute(&mut *tx)
            .await?;
    }
    Ok(tx)
}

#[derive(Debug, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub pool: PoolStats,
}

/// Mirrors `check_db_health`: a `SELECT 1` round trip plus pool gauges.
pub async fn health_check(pool: &PgPool) -> HealthStatus {
    match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthStatus {
            status: "healthy",
            pool: PoolStats {
                size: pool.size(),
                idle: pool.num_idle(),
            },
        },
        Err(_) => HealthStatus {
            status: "unhealthy",
            pool: PoolStats {
                size: pool.size(),
                idle: pool.num_idle(),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::LARGE_BATCH_THRESHOLD;

    #[test]
    fn large_batch_threshold_is_fifty_blocks() {
        assert_eq!(LARGE_BATCH_THRESHOLD, 50);
    }
}
