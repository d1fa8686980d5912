mod config;

use algo_trade_core::{ConfigLoader, MarketGateway};
use algo_trade_exits::{ExitEngine, ExitStore, JsonFileExitStore};
use algo_trade_kalshi::KalshiClient;
use clap::{Parser, Subcommand};
use config::AppConfig;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "algo-trade-exits")]
#[command(about = "Exit engine for prediction-market positions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the exit engine until SIGINT or SIGTERM
    Run {
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,

        /// Do not resume open positions from the store
        #[arg(long)]
        fresh: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, fresh } => {
            run_exit_engine(&config, fresh).await?;
        }
    }

    Ok(())
}

async fn run_exit_engine(config_path: &str, fresh: bool) -> anyhow::Result<()> {
    tracing::info!("Starting exit engine with config: {}", config_path);

    let config: AppConfig = ConfigLoader::load_from(config_path)?;

    let client = KalshiClient::new(config.kalshi.clone())?;
    tracing::info!("Kalshi gateway ready at {}", client.base_url());
    let gateway: Arc<dyn MarketGateway> = Arc::new(client);

    tracing::info!("Opening exit store at {}", config.store_path.display());
    let store: Arc<dyn ExitStore> =
        Arc::new(JsonFileExitStore::open(config.store_path.clone()).await?);

    let engine = ExitEngine::builder(gateway)
        .with_config(config.engine)
        .with_store(store)
        .build()?;
    let handle = engine.start();

    if fresh {
        tracing::info!("Skipping resume, starting with no tracked positions");
    } else {
        let resumed = handle.resume().await?;
        tracing::info!("Resumed {} open position(s) from store", resumed);
    }

    shutdown_signal().await?;

    tracing::info!("Stopping exit engine...");
    if let Err(e) = handle.shutdown().await {
        tracing::error!("Error during exit engine shutdown: {}", e);
    }

    let stats = engine.price_cache().stats();
    tracing::info!(
        hits = stats.hits,
        misses = stats.misses,
        daily_pnl = %engine.circuit_breaker().daily_pnl(),
        "Exit engine stopped"
    );
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
    }
    Ok(())
}
