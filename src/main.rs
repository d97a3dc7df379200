use clap::{Parser, Subcommand};
use ergindex::config::{get_global_config, init_global_config};
use ergindex::telemetry::{init_tracing, TelemetryConfig};
use ergindex::{api, db, metrics, pipeline};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ergindex", about = "Ergo-style UTXO chain indexer and read API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the indexer and API (default when no subcommand is given).
    Run,
    /// Drop and recreate the schema, then exit.
    ResetDb,
    /// Repeat ingestion over a fixed height range under different knobs.
    Benchmark {
        #[arg(long)]
        start: i64,
        #[arg(long)]
        count: i64,
        #[arg(long, default_value_t = false)]
        sequential: bool,
        #[arg(long, default_value_t = false)]
        parallel: bool,
        #[arg(long, default_value_t = false)]
        compare: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_global_config()?;
    let config = get_global_config();

    init_tracing(TelemetryConfig::default())?;
    metrics::register_all();

    let cli = Cli::parse();
    let pool = db::connect(&config.database).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::ResetDb => {
            info!("resetting database schema");
            db::schema::init(&pool, true).await?;
            return Ok(());
        }
        Command::Benchmark {
            start,
            count,
            sequential,
            parallel,
            compare,
        } => {
            db::schema::init(&pool, false).await?;
            run_benchmark(&pool, config, start, count, sequential, parallel, compare).await?;
            return Ok(());
        }
        Command::Run => {
            db::schema::init(&pool, config.indexer.reset_db).await?;
        }
    }

    let shutdown = CancellationToken::new();

    let api_pool = pool.clone();
    let api_shutdown = shutdown.clone();
    let api_task = tokio::spawn(async move {
        let app = api::router(api_pool);
        let addr = SocketAddr::from(([0, 0, 0, 0], 3005));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "failed to bind API listener");
                return;
            }
        };
        info!(%addr, "API listening");
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            api_shutdown.cancelled().await;
        });
        if let Err(e) = serve.await {
            error!(error = %e, "API server exited with error");
        }
    });

    let pipeline_shutdown = shutdown.clone();
    let pipeline_config = config.clone();
    let pipeline_pool = pool.clone();
    let pipeline_task = tokio::spawn(async move {
        pipeline::run(&pipeline_config, pipeline_pool, pipeline_shutdown).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }
    shutdown.cancel();

    let _ = tokio::join!(api_task, pipeline_task);
    Ok(())
}

/// Repeats ingestion over `[start, start+count)` with the requested
/// mode(s), reporting elapsed time per mode. A developer convenience
/// for comparing sequential vs. parallel throughput, not a production
/// ingestion path.
async fn run_benchmark(
    pool: &sqlx::PgPool,
    config: &ergindex::config::Config,
    start: i64,
    count: i64,
    sequential: bool,
    parallel: bool,
    compare: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let node = std::sync::Arc::new(ergindex::node::NodeClient::new(&config.node));
    let end = start + count - 1;
    let run_sequential = sequential || compare || (!sequential && !parallel);
    let run_parallel = parallel || compare;

    if run_sequential {
        let t0 = std::time::Instant::now();
        for h in start..=end {
            pipeline::sequential::process_height(&node, pool, h, "sequential").await?;
        }
        info!(elapsed_ms = t0.elapsed().as_millis(), "sequential benchmark complete");
    }

    if run_parallel {
        let t0 = std::time::Instant::now();
        pipeline::window::run_window(node.clone(), pool.clone(), &config.indexer, start - 1, end).await;
        info!(elapsed_ms = t0.elapsed().as_millis(), "parallel benchmark complete");
    }

    let _ = tokio::time::sleep(Duration::from_millis(0)).await;
    Ok(())
}
