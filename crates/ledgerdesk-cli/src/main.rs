//! ledgerdesk - a terminal client for a permissioned ledger's CA and
//! chaincode REST service.
//!
//! Enrolls against the CA, keeps the session token fresh and runs chaincode
//! invokes and queries behind a login guard.

mod app;
mod command;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ledgerdesk_core::config::Config;

use app::App;
use command::USAGE;

// ============================================================================
// Constants
// ============================================================================

/// Directory for daily rolling log files, in addition to stderr
const LOG_DIR_ENV: &str = "LEDGERDESK_LOG_DIR";

const LOG_FILE_PREFIX: &str = "ledgerdesk.log";

const EXIT_USAGE: u8 = 2;

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes the file writer and must outlive `main`'s work.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config() -> Result<Config> {
    let mut config = Config::load()?;
    config.apply_env()?;
    debug!(endpoint = %config.endpoint, storage = ?config.storage, "Configuration loaded");
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, USAGE);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    info!(?command, "ledgerdesk starting");

    let result = match load_config().and_then(App::new) {
        Ok(mut app) => app.run(command).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
