//! steuergrid CLI.
//!
//! Thin wrapper over the library: `run` starts the engine, `backtest`
//! replays a CSV, `setup` writes a starter config, `report` emits the
//! Anlage SO exports. Exit codes: 0 success, 2 config error, 3 ledger
//! corruption, 4 exchange auth failure, 1 any other fatal error.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use steuergrid_bot::app::paper::PaperSession;
use steuergrid_bot::config::ApiCredentials;
use steuergrid_bot::{backtest, AppConfig, AppError, Engine, MarketEvent};
use steuergrid_tax::{FixedRate, JsonLedgerStore, LedgerStore, TaxReport};

/// Tax-aware XBT/USD spot grid market maker.
#[derive(Parser, Debug)]
#[command(name = "steuergrid", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the trading engine.
    Run {
        /// Configuration file (also via STEUERGRID_CONFIG).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Trade against the in-process paper venue instead of a live
        /// connector.
        #[arg(long)]
        paper: bool,
        /// Optional CSV tick file replayed as the paper market feed.
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Replay a CSV tick file through the engine.
    Backtest {
        /// CSV with ts,price,volume rows.
        #[arg(long)]
        data: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write a starter configuration file.
    Setup {
        /// Destination path.
        #[arg(short, long, default_value = "config/steuergrid.toml")]
        output: PathBuf,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Emit the Anlage SO tax report for a year.
    Report {
        #[arg(short, long)]
        year: i32,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = steuergrid_telemetry::init_logging() {
        eprintln!("logging init failed: {e}");
    }

    let cli = Cli::parse();
    if let Err(e) = dispatch(cli).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn dispatch(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Run { config, paper, data } => cmd_run(config, paper, data).await,
        Command::Backtest { data, config } => cmd_backtest(config, data).await,
        Command::Setup { output, force } => cmd_setup(output, force),
        Command::Report { year, config } => cmd_report(config, year),
    }
}

async fn cmd_run(
    config_path: Option<PathBuf>,
    paper: bool,
    data: Option<PathBuf>,
) -> Result<(), AppError> {
    let config = AppConfig::load(config_path.as_deref())?;

    if !paper {
        // The live venue connector is deployed as a separate adapter
        // crate; this binary only carries the paper venue. Credentials
        // are still validated so a misconfigured deployment fails fast
        // with the right exit code.
        let _credentials = ApiCredentials::from_env()?;
        return Err(AppError::Config(
            "no live venue connector in this binary; use --paper or link a connector".into(),
        ));
    }

    info!("Starting in paper mode");
    let session = Arc::new(PaperSession::default());
    let store: Arc<dyn LedgerStore> = Arc::new(JsonLedgerStore::new(config.ledger_path.clone()));
    let rates = Arc::new(FixedRate(config.eur_usd_rate_fallback));

    let engine = Engine::bootstrap(config.clone(), session.clone(), store, rates)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let (market_tx, market_rx) = mpsc::channel(1024);
    if let Some(path) = data {
        tokio::spawn(replay_feed(path, config.idle_tick_ms, session.clone(), market_tx));
    } else {
        warn!("No market feed configured; engine will idle");
        // Park the sender so the engine does not see EOF.
        tokio::spawn(async move {
            let _keep_alive = market_tx;
            std::future::pending::<()>().await;
        });
    }

    engine.run(market_rx, shutdown_rx).await
}

/// Stream a CSV tick file into the paper session and the market
/// channel, one row per idle interval.
async fn replay_feed(
    path: PathBuf,
    pace_ms: u64,
    session: Arc<PaperSession>,
    market_tx: mpsc::Sender<MarketEvent>,
) {
    let Ok(mut reader) = csv::Reader::from_path(&path) else {
        warn!(path = %path.display(), "Cannot open feed file");
        return;
    };
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(pace_ms.max(1)));
    for record in reader.deserialize::<(String, rust_decimal::Decimal, Option<rust_decimal::Decimal>)>() {
        interval.tick().await;
        let Ok((_, price, volume)) = record else {
            continue;
        };
        let mid = steuergrid_core::Price::new(price);
        session.on_mid(mid, chrono::Utc::now());
        if market_tx.send(MarketEvent::Mid(mid)).await.is_err() {
            return;
        }
        if let Some(volume) = volume {
            let _ = market_tx
                .send(MarketEvent::Trade {
                    price: mid,
                    qty: steuergrid_core::Qty::new(volume),
                })
                .await;
        }
    }
    info!("Feed file exhausted");
}

fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("sigterm handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("Signal received, shutting down");
        let _ = shutdown_tx.send(true);
    });
}

async fn cmd_backtest(config_path: Option<PathBuf>, data: PathBuf) -> Result<(), AppError> {
    let config = AppConfig::load(config_path.as_deref())?;
    let report = backtest::run(&config, &data).await?;
    println!("{report}");
    Ok(())
}

fn cmd_setup(output: PathBuf, force: bool) -> Result<(), AppError> {
    if output.exists() && !force {
        return Err(AppError::Config(format!(
            "{} already exists (use --force to overwrite)",
            output.display()
        )));
    }
    if let Some(dir) = output.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let config = AppConfig::default();
    let body = toml::to_string_pretty(&config)
        .map_err(|e| AppError::Other(format!("config serialization failed: {e}")))?;
    std::fs::write(&output, body)?;
    println!("Wrote starter config to {}", output.display());
    println!("Set STEUERGRID_API_KEY and STEUERGRID_API_SECRET in the environment.");
    Ok(())
}

fn cmd_report(config_path: Option<PathBuf>, year: i32) -> Result<(), AppError> {
    let config = AppConfig::load(config_path.as_deref())?;
    let store = JsonLedgerStore::new(config.ledger_path.clone());
    let ledger = store
        .load()?
        .map(steuergrid_tax::LedgerDocument::into_ledger)
        .ok_or_else(|| {
            AppError::Other(format!("no ledger at {}", config.ledger_path.display()))
        })?;

    std::fs::create_dir_all(&config.data_dir)?;
    let report = TaxReport::new(&ledger);

    let csv_path = config.data_dir.join(format!("anlage_so_{year}.csv"));
    report.write_csv(year, std::fs::File::create(&csv_path)?)?;
    let json_path = config.data_dir.join(format!("anlage_so_{year}.json"));
    report.write_json(year, std::fs::File::create(&json_path)?)?;

    println!("{}", report.summary_text(year));
    println!("CSV:  {}", csv_path.display());
    println!("JSON: {}", json_path.display());
    Ok(())
}
