/// Main entry point for the trading engine
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::Parser;
use tracing::{error, info, warn};

use optra::broker::{BrokerApi, HttpBroker};
use optra::config::{load_config, Config};
use optra::engine::Scheduler;
use optra::portfolio::ArchiveWriter;
use optra::risk::{BanListSource, FileBanList, StaticBanList};
use optra::time::{Clock, SystemClock};
use optra::types::TradingMode;
use optra::utils::ShutdownToken;
use optra::TradingError;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_AUTH: i32 = 2;
const EXIT_ARCHIVE: i32 = 3;
const EXIT_SIGINT: i32 = 130;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Paper,
    Live,
    Backtest,
}

impl From<ModeArg> for TradingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Paper => TradingMode::Paper,
            ModeArg::Live => TradingMode::Live,
            ModeArg::Backtest => TradingMode::Backtest,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "optra",
    about = "Automated intraday options trading engine for Indian index derivatives"
)]
struct Cli {
    /// Execution mode; overrides the config file
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Evaluate signals without touching the ledger or the broker
    #[arg(long)]
    dry_run: bool,

    /// Re-run archival for a trading day from the last checkpoint
    #[arg(long, value_name = "DATE")]
    force_archive: Option<NaiveDate>,

    /// Load the saved positions file for DATE before trading
    #[arg(long, value_name = "DATE")]
    restore_positions: Option<NaiveDate>,
}

fn init_logging(config: &Config) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Re-run archival for a day using the last written checkpoint. Only the
/// trades the checkpoint carries are archived; a live portfolio archives
/// its full log through the normal end-of-day path.
fn force_archive(config: &Config, date: NaiveDate) -> i32 {
    let writer = ArchiveWriter::from_config(config);

    let checkpoint = match writer.load_checkpoint() {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            error!("No usable checkpoint: {}", e);
            return EXIT_ARCHIVE;
        }
    };

    if checkpoint.trading_day != date {
        error!(
            "Checkpoint covers {}, not {}; cannot force-archive",
            checkpoint.trading_day, date
        );
        return EXIT_ARCHIVE;
    }

    writer.clear_marker(date, checkpoint.mode);
    let record = ArchiveWriter::build_record(
        &checkpoint.portfolio,
        &checkpoint.portfolio.recent_trades,
        &Default::default(),
        chrono::Utc::now(),
    );

    match writer.write_archive(&record) {
        Ok(path) => {
            info!("Forced archive written to {}", path.display());
            EXIT_OK
        }
        Err(e) => {
            error!("Forced archive failed: {} ({})", e, e.error_code());
            EXIT_ARCHIVE
        }
    }
}

fn spawn_signal_handlers(shutdown: ShutdownToken, sigint_seen: Arc<AtomicBool>) {
    {
        let shutdown = shutdown.clone();
        let sigint_seen = Arc::clone(&sigint_seen);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("SIGINT received, shutting down");
                sigint_seen.store(true, Ordering::SeqCst);
                shutdown.trigger();
            }
        });
    }

    #[cfg(unix)]
    {
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                info!("SIGTERM received, shutting down");
                shutdown.trigger();
            }
        });
    }
}

async fn run(cli: Cli) -> i32 {
    let mut config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return EXIT_CONFIG;
        }
    };
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }

    init_logging(&config);
    info!("🚀 optra {} starting ({})", env!("CARGO_PKG_VERSION"), config.mode.as_str());

    if let Some(date) = cli.force_archive {
        return force_archive(&config, date);
    }

    let config = Arc::new(config);

    let api: Arc<dyn BrokerApi> =
        match HttpBroker::new(&config.broker_base_url, &config.broker_api_key) {
            Ok(broker) => Arc::new(broker),
            Err(e) => {
                error!("Broker client construction failed: {}", e);
                return EXIT_CONFIG;
            }
        };

    let ban_source: Arc<dyn BanListSource> = match &config.ban_list_path {
        Some(path) => Arc::new(FileBanList::new(path)),
        None => Arc::new(StaticBanList::empty()),
    };

    let shutdown = ShutdownToken::new();
    let sigint_seen = Arc::new(AtomicBool::new(false));
    spawn_signal_handlers(shutdown.clone(), Arc::clone(&sigint_seen));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler = match Scheduler::new(
        Arc::clone(&config),
        clock,
        api,
        ban_source,
        shutdown.clone(),
        cli.dry_run,
    ) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Engine construction failed: {} ({})", e, e.error_code());
            return EXIT_CONFIG;
        }
    };

    if let Some(date) = cli.restore_positions {
        match scheduler.restore_positions(date).await {
            Ok(count) => info!("Restored {} positions for {}", count, date),
            Err(e) => {
                error!("Position restore failed: {} ({})", e, e.error_code());
                return EXIT_CONFIG;
            }
        }
    }

    if cli.dry_run {
        warn!("Dry-run: signals are evaluated but nothing is executed");
    }

    match scheduler.run().await {
        Ok(()) => {
            if sigint_seen.load(Ordering::SeqCst) {
                EXIT_SIGINT
            } else {
                EXIT_OK
            }
        }
        Err(e) if e.is_archival() => {
            error!("Archival failure: {} ({})", e, e.error_code());
            EXIT_ARCHIVE
        }
        Err(TradingError::AuthFailed(msg)) => {
            error!("Broker authentication failed: {}", msg);
            EXIT_AUTH
        }
        Err(e) => {
            error!("Engine stopped: {} ({})", e, e.error_code());
            EXIT_CONFIG
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}
