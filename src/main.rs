//! `rftp`: download one file over FTP, resuming from the last breakpoint.
//!
//! ```text
//! rftp --config ftp.json pub/big.iso --dest ~/Downloads
//! ```
//!
//! Ctrl-C suspends the transfer and records where it stopped; running the
//! same command again continues from there.

use clap::Parser;
use rftp_ftp::{FtpConfig, FtpResult, PercentTracker, Session, TransferState};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rftp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON connection config (host, port, username, password, ...)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// Remote file, relative to the initial directory
    file: String,

    /// Local directory to download into
    #[arg(short, long)]
    dest: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(cli).await {
        Ok(TransferState::Completed) => ExitCode::SUCCESS,
        Ok(state) => {
            tracing::warn!("transfer ended as {:?}; run again to resume", state);
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> FtpResult<TransferState> {
    let mut config = match &cli.config {
        Some(path) => FtpConfig::from_json_file(path)?,
        None => FtpConfig::default(),
    };
    if let Some(host) = cli.host {
        config.host = host;
    }

    let mut session = Session::connect(config.clone()).await?;
    tracing::info!("session {} connected to {}", session.id(), session.host());

    if config.username == "anonymous" {
        session.anonymous_login().await?;
    } else {
        session.login(&config.username, &config.password).await?;
    }
    if let Some(dir) = &config.initial_directory {
        session.change_directory(dir).await?;
    }
    session.set_transfer_type(config.transfer_type).await?;

    let tracker = Arc::new(PercentTracker::new());
    session.add_progress_sink(tracker.clone());
    session.download(&cli.file, cli.dest.as_deref()).await?;

    let mut ticker = tokio::time::interval(Duration::from_millis(300));
    let mut last_percent = u32::MAX;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let state = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted, suspending transfer");
                session.stop().await;
                break session.state();
            }
            _ = ticker.tick() => {
                let percent = tracker.percent();
                if percent != last_percent {
                    tracing::info!("{}: {}% ({} bytes)", cli.file, percent, session.bytes_written());
                    last_percent = percent;
                }
                let state = session.state();
                if state.is_terminal() {
                    break session.wait().await;
                }
            }
        }
    };

    if let Err(e) = session.quit().await {
        tracing::debug!("QUIT failed: {}", e);
    }
    Ok(state)
}
