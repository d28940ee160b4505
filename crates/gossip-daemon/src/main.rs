//! gossip-daemon: One node of a push-pull gossip averaging experiment.
//!
//! Each node exchanges its scalar estimate with a random neighbour once per
//! epoch and answers its neighbours' exchanges, then writes its history as
//! CSV under the experiment's output directory.

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use gossip_daemon::{Config, Daemon, LogFormat, OutputPaths};

#[derive(Parser, Debug)]
#[command(name = "gossip-daemon")]
#[command(about = "Push-pull gossip averaging node")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short = 'f', long)]
    config: PathBuf,

    /// Experiment start time in unix seconds (0 = now)
    #[arg(short = 't', long)]
    start_time: f64,

    /// Initial scalar state of this node
    #[arg(short = 's', long, allow_negative_numbers = true)]
    state: f64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(config: &Config, verbose: bool, log_file: File) {
    let default_filter = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = Mutex::new(log_file);
    let file_layer = match config.logging.format {
        LogFormat::Full => fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(log_file)
            .with_ansi(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

fn node_name() -> String {
    hostname::get().map_or_else(
        |_| "unknown".to_string(),
        |h| h.to_string_lossy().into_owned(),
    )
}

async fn run(args: Args) -> Result<bool> {
    let config = Config::load(&args.config)?;

    let node = node_name();
    let output = OutputPaths::prepare(
        &config.paths.root_folder,
        &config.experiment.relative_dir(),
        &node,
    )
    .context("Failed to prepare output directory")?;
    init_tracing(&config, args.verbose, output.open_log()?);

    info!("Starting gossip-daemon on {}", node);
    info!("Config: {:?}", args.config);
    info!("Output: {:?}", output.dir);

    let daemon = Daemon::setup(&config, args.start_time, args.state, output.history)?;
    let outcome = daemon.run(shutdown_signal()).await?;

    if outcome.exhausted() {
        info!("Run stopped early after exhausting an error budget");
    }
    Ok(outcome.interrupted)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => {
            info!("Exiting after shutdown signal");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
