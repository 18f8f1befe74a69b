//! alpaca_long_short - Main Entry Point
//!
//! Runs one of the strategies against the configured Alpaca account, or
//! prints the market data stream for a list of symbols.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use alpaca_long_short::common::channels::{create_event_channel, create_shutdown_channel};
use alpaca_long_short::config::{load_config, AppConfig};
use alpaca_long_short::strategy::{
    LogTelemetry, LongShort, MeanReversion, Session, SessionStrategy, SessionTiming,
};
use alpaca_long_short::{AlpacaClient, StreamClient, StreamEvent};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the long-short equity rebalancer
    LongShort,
    /// Run the single-symbol mean reversion strategy
    MeanReversion {
        /// Override the configured symbol
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Print trades, quotes and bars from the data stream
    Listen {
        /// Comma-separated list of symbols to subscribe
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting alpaca_long_short");
    info!("Configuration file: {}", args.config);

    dotenvy::dotenv().ok();
    let config = load_config(Some(&args.config)).context("failed to load configuration")?;

    let client = AlpacaClient::with_timeout(
        config.alpaca.clone(),
        Duration::from_secs(config.settings.request_timeout_seconds),
    )?
    .with_heartbeat_interval(config.settings.heartbeat_interval_seconds);

    if !client.has_credentials() {
        warn!("No API credentials configured; authenticated calls will fail");
    }

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, cleaning up...");
            let _ = shutdown_tx.send(true);
        }
    });

    match args.command {
        Command::LongShort => {
            let timing = SessionTiming::from(&config.long_short);
            let strategy = LongShort::new(&config.long_short);
            run_session(&client, strategy, timing, shutdown_rx).await
        }
        Command::MeanReversion { symbol } => {
            let mut mr_config = config.mean_reversion.clone();
            if let Some(symbol) = symbol {
                mr_config.symbol = symbol;
            }
            let timing = SessionTiming::from(&mr_config);
            let strategy = MeanReversion::new(&mr_config);
            run_session(&client, strategy, timing, shutdown_rx).await
        }
        Command::Listen { symbols } => listen(client, &config, symbols, shutdown_rx).await,
    }
}

async fn run_session<S: SessionStrategy>(
    client: &AlpacaClient,
    strategy: S,
    timing: SessionTiming,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!("Running strategy {}", strategy.name());
    let mut session = Session::new(
        client.gateway(),
        strategy,
        Arc::new(LogTelemetry),
        timing,
        shutdown,
    );
    session.run().await?;
    Ok(())
}

async fn listen(
    mut client: AlpacaClient,
    config: &AppConfig,
    symbols: Vec<String>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let symbols = if symbols.is_empty() {
        vec![config.mean_reversion.symbol.clone()]
    } else {
        symbols
    };

    let (tx, mut rx) = create_event_channel();
    client.subscribe(&symbols).await?;
    client.start(tx).await?;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(StreamEvent::Trade(trade)) => {
                    info!(symbol = %trade.symbol, price = %trade.price, size = trade.size, "trade");
                }
                Some(StreamEvent::Quote(quote)) => {
                    info!(symbol = %quote.symbol, bid = %quote.bid_price, ask = %quote.ask_price, "quote");
                }
                Some(StreamEvent::Bar { symbol, bar }) => {
                    info!(symbol = %symbol, close = %bar.close, volume = bar.volume, "bar");
                }
                Some(other) => info!("{:?}", other),
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }

    client.disconnect().await?;
    Ok(())
}
