pub mod handlers;

use axum::routing::get;
use axum::{Extension, Router};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};

/// Builds the thin read-only API router: status, block, transaction
/// and address-balance projections over the same schema the indexer
/// writes, plus `/health` and `/metrics` for operations.
pub fn router(pool: PgPool) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(handlers::status))
        .route("/blocks/{height}", get(handlers::block_by_height))
        .route("/tx/{id}", get(handlers::transaction_by_id))
        .route("/address/{addr}", get(handlers::address_balance))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(cors)
        .layer(Extension(pool))
}
