//! CLI entry point for building L/MLT precipitation maps.
//!
//! Provides subcommands for running (or resuming) the aggregation, exporting
//! the maps held in the checkpoint, and listing the days still to process.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use precip_maps::checkpoint::{CheckpointStore, pending};
use precip_maps::config::MapConfig;
use precip_maps::driver::{DaySource, RunReport, StreamDriver};
use precip_maps::output::{export_map, print_json};
use precip_maps::source::DayEnumerator;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "precip-maps")]
#[command(about = "Bin satellite precipitation counts into an L/MLT map", long_about = None)]
struct Cli {
    /// JSON config file; defaults are used for anything it leaves out
    #[arg(short, long, env = "PRECIP_MAPS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, env = "PRECIP_MAPS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Override the checkpoint directory
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every pending day, resuming from the checkpoint
    Bin {
        /// Never fall back to the remote listing
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// Export the mean and count maps from the checkpoint
    Export,
    /// List candidate days and how many are still pending
    ListDays {
        /// Never fall back to the remote listing
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/precip_maps.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("precip_maps.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MapConfig::load(path)?,
        None => MapConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.source.data_dir = dir;
    }
    if let Some(dir) = cli.checkpoint_dir {
        config.checkpoint_dir = dir;
    }

    match cli.command {
        Commands::Bin { offline } => {
            if offline {
                config.remote_url = None;
            }
            bin(&config)?;
        }
        Commands::Export => {
            let driver = open_driver(&config)?;
            export_maps(&config, &driver)?;
        }
        Commands::ListDays { offline } => {
            if offline {
                config.remote_url = None;
            }
            let days = config.enumerator().days()?;
            let store = CheckpointStore::new(&config.checkpoint_dir);
            let cursor = store.load(&config.grid()?)?.map(|(c, _)| c);
            let todo = pending(&days, cursor);

            for day in &days {
                info!(%day, pending = todo.contains(day), "Day");
            }
            info!(
                total = days.len(),
                pending = todo.len(),
                cursor = ?cursor,
                "Day list summary"
            );
        }
    }

    Ok(())
}

fn open_driver(config: &MapConfig) -> Result<StreamDriver> {
    let grid = config.grid().context("invalid bin configuration")?;
    let store = CheckpointStore::new(&config.checkpoint_dir);
    Ok(StreamDriver::resume(grid, config.tolerance(), store)?)
}

/// Runs the aggregation and exports the maps whether or not it succeeded.
#[tracing::instrument(skip(config), fields(data_dir = %config.source.data_dir.display()))]
fn bin(config: &MapConfig) -> Result<()> {
    let mut driver = open_driver(config)?;
    watch_ctrl_c(driver.stop_handle())?;

    let result = run_days(config, &mut driver);
    if let Err(e) = &result {
        error!(error = %e, "Aggregation stopped, exporting last committed map");
    }

    export_maps(config, &driver)?;
    let report = result?;
    print_json(&report)?;
    Ok(())
}

/// First Ctrl-C asks the driver to stop after the current day, so the maps
/// are still exported. A second one exits immediately; the checkpoint on
/// disk is intact either way.
fn watch_ctrl_c(stop: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start signal runtime")?;

    std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if stop.swap(true, Ordering::SeqCst) {
                        warn!("Second interrupt, exiting without export");
                        std::process::exit(130);
                    }
                    warn!("Interrupt received, stopping after the current day");
                }
            });
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

fn run_days(config: &MapConfig, driver: &mut StreamDriver) -> Result<RunReport> {
    let mut source = DaySource::from_enumerator(&config.enumerator(), driver.cursor(), config.loader())?;
    Ok(driver.run(&mut source)?)
}

fn export_maps(config: &MapConfig, driver: &StreamDriver) -> Result<()> {
    export_map(&config.mean_map, &driver.state().mean_view(driver.grid()))?;
    export_map(&config.count_map, &driver.state().count_view(driver.grid()))?;
    Ok(())
}
