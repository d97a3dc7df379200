/// Read-only HTTP handlers for the thin read API: `/status`,
/// `/blocks/:height`, `/tx/:id`, `/address/:addr`, plus `/health` and
/// `/metrics` for operations.
use crate::db::queries;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;
use sqlx::PgPool;

pub async fn status(Extension(pool): Extension<PgPool>) -> impl IntoResponse {
    match queries::get_sync_status(&pool).await {
        Ok(status) => Json(json!(status)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn block_by_height(
    Extension(pool): Extension<PgPool>,
    Path(height): Path<i64>,
) -> impl IntoResponse {
    match queries::get_block_by_height(&pool, height).await {
        Ok(Some(block)) => Json(json!(block)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no main-chain block at height {height}") })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn transaction_by_id(
    Extension(pool): Extension<PgPool>,
    Path(tx_id): Path<String>,
) -> impl IntoResponse {
    match queries::get_transaction_by_id(&pool, &tx_id).await {
        Ok(Some(tx)) => Json(json!(tx)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no transaction {tx_id}") })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn address_balance(
    Extension(pool): Extension<PgPool>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    match queries::get_address_balance(&pool, &address).await {
        Ok(balance) => Json(json!(balance)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn metrics() -> impl IntoResponse {
    match crate::metrics::gather_text() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn health(Extension(pool): Extension<PgPool>) -> impl IntoResponse {
    let status = crate::db::pool::health_check(&pool).await;
    Json(json!(status))
}
