/// The singleton sync cursor. `load` lazily creates the row with zeros;
/// `advance` must be called inside the caller's transaction so the
/// cursor only moves once its dependent rows are durable.
use crate::model::SyncStatus;
use sqlx::{PgPool, Postgres, Transaction as PgTx};

pub async fn load(pool: &PgPool) -> Result<SyncStatus, sqlx::Error> {
    let existing = sqlx::query_as::<_, SyncStatus>(
        "SELECT current_height, target_height, is_syncing, last_block_time FROM sync_status WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    if let Some(status) = existing {
        return Ok(status);
    }

    sqlx::query(
        "INSERT INTO sync_status (id, current_height, target_height, is_syncing) \
         VALUES (1, 0, 0, false) ON CONFLICT (id) DO NOTHING",
    )
    .execute(pool)
    .await?;

    Ok(SyncStatus::zero())
}

/// Advances the durable cursor within an in-flight transaction.
pub async fn advance(tx: &mut PgTx<'_, Postgres>, height: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE sync_status SET current_height = $1, last_block_time = extract(epoch from now())::bigint * 1000, updated_at = now() WHERE id = 1",
    )
    .bind(height)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn set_target(pool: &PgPool, target_height: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sync_status SET target_height = $1, updated_at = now() WHERE id = 1")
        .bind(target_height)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_syncing(pool: &PgPool, is_syncing: bool) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sync_status SET is_syncing = $1, updated_at = now() WHERE id = 1")
        .bind(is_syncing)
        .execute(pool)
        .await?;
    Ok(())
}

/// Resets the cursor to `height` during reorg recovery.
pub async fn reset_to(tx: &mut PgTx<'_, Postgres>, height: i64) -> Result<(), sqlx::Error> {
    advance(tx, height).await
}
