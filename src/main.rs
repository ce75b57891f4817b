use clap::Parser;
use redis_lite::server::Server;
use redis_lite::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A minimal, Redis-compatible in-memory key/value server.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Listen address, host:port.
    #[arg(long, default_value = "localhost:6379")]
    addr: String,

    /// Expiry sweeper tick interval, in seconds.
    #[arg(long, default_value_t = 60)]
    cleanup_interval_secs: u64,

    /// Initial per-read chunk size for each connection's read loop.
    #[arg(long, default_value_t = 512)]
    read_buffer_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let store = Arc::new(Store::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper_store = Arc::clone(&store);
    let sweeper_shutdown = shutdown_rx.clone();
    let sweeper = tokio::spawn(redis_lite::store::run_sweeper(
        sweeper_store,
        Duration::from_secs(cli.cleanup_interval_secs),
        sweeper_shutdown,
    ));

    let server = Arc::new(Server::new(cli.addr, cli.read_buffer_size, store));
    let server_handle = tokio::spawn(Arc::clone(&server).run(shutdown_rx));

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = server_handle.await;
    let _ = sweeper.await;

    Ok(())
}
