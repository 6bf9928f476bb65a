//! FTP Pusher - Main Entry Point
//!
//! ```text
//! ftp-pusher [-q | -v] <configuration-file>
//!
//!   load ini ──> validate ──> snapshot hot folder ──> connect/login ──> STOR + move
//!      │            │              │                      │
//!      1          1/2/3            2                     4/5        Ctrl-C: 10
//! ```
//!
//! The process exit code is the only machine-readable result; see
//! [`ExitStatus`] for the full table.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

use ftp_pusher::client::FtpClient;
use ftp_pusher::config::{validate, ConfigError, Settings};
use ftp_pusher::exit::ExitStatus;
use ftp_pusher::ini::RawConfig;
use ftp_pusher::runner::Runner;

/// Upload every file in a hot folder to an FTP server
///
/// Each file that the server confirms is moved to the cold folder; files
/// that fail stay in the hot folder for the next run.
#[derive(Parser)]
#[command(name = "ftp-pusher")]
#[command(version)]
#[command(about = "Push hot-folder files to an FTP server", long_about = None)]
struct Cli {
    /// Only report problems
    #[arg(short, long)]
    quiet: bool,

    /// Enable debug logging, including the FTP conversation
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// INI file with [folders] and [server] sections
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let status = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitStatus::Success,
                _ => ExitStatus::Usage,
            };
            let _ = e.print();
            return status.into();
        }
    };

    if let Err(e) = init_logging(&cli) {
        eprintln!("Failed to set up logging: {:#}", e);
        return ExitStatus::Usage.into();
    }

    // Listen before any network activity so an early Ctrl-C is not lost
    let interrupt = tokio::spawn(wait_for_interrupt());
    let shutdown = async move {
        let _ = interrupt.await;
    };

    let settings = match load_settings(&cli.config) {
        Ok(settings) => settings,
        Err(status) => return status.into(),
    };
    debug!(
        "Hot folder {:?}, cold folder {:?}, server {}",
        settings.hot_dir(),
        settings.cold_dir(),
        settings.server().socket_addr()
    );

    let runner = Runner::new(settings, FtpClient::new(!cli.quiet));
    match runner.run(shutdown).await {
        Ok(outcome) if outcome.interrupted => ExitStatus::from(&outcome).into(),
        Ok(outcome) => {
            info!("{}", outcome.summary());
            ExitStatus::from(&outcome).into()
        }
        Err(e) => {
            error!("{}", e);
            ExitStatus::from(&e).into()
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install the log subscriber")?;
    Ok(())
}

/// Read and validate the configuration, reporting problems as they are found
fn load_settings(path: &Path) -> Result<Settings, ExitStatus> {
    if !path.is_file() {
        error!("{:?} does not exist.", path);
        return Err(ExitStatus::Usage);
    }

    let raw = RawConfig::load(path)
        .with_context(|| format!("Failed to read configuration {:?}", path))
        .map_err(|e| {
            error!("{:#}", e);
            ExitStatus::Usage
        })?;

    validate(&raw).map_err(|e| {
        match &e {
            ConfigError::Defects(defects) => {
                error!("Incomplete configuration:");
                for defect in defects {
                    error!("  {}", defect);
                }
            }
            other => error!("{}", other),
        }
        ExitStatus::from(&e)
    })
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
///
/// A handler that cannot be installed never fires.
async fn wait_for_interrupt() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            debug!("Ctrl-C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                debug!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
