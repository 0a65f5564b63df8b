// privacyd - per-application privacy settings service

mod commands;
mod exit_codes;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use privacyd_config::{ConfigError, ServiceConfig};

use exit_codes::{EXIT_CONFIG, EXIT_SUCCESS};

#[derive(Parser)]
#[command(name = "privacyd")]
#[command(about = "Per-application privacy settings service")]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config dir>/privacyd/privacyd.toml)
    #[arg(long, short = 'c', env = "PRIVACYD_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve: watch the mirror and purge stale settings periodically
    Run,

    /// Run one reconciliation pass and print its report as JSON
    #[command(after_help = "\
Exit status is 0 when every item was reconciled, 1 when some failed.
Examples:
  privacyd purge
  privacyd --config /etc/privacyd.toml purge | jq .failures")]
    Purge,

    /// Open the store, upgrading its schema if needed, and exit
    Migrate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Explicit paths must load; the default path may be absent or broken
    let (config, deferred) = match load_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    init_logging(&config.log.filter);
    if let Some(e) = deferred {
        log::warn!("{e}; using default configuration");
    }

    let result = match cli.command {
        Commands::Run => commands::run(&config),
        Commands::Purge => commands::purge_once(&config).map(|report| {
            println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            report.ok()
        }),
        Commands::Migrate => commands::migrate(&config),
    };

    match result {
        Ok(true) => ExitCode::from(EXIT_SUCCESS),
        Ok(false) => ExitCode::from(exit_codes::EXIT_PURGE_PARTIAL),
        Err(e) => {
            log::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::from(e.code())
        }
    }
}

fn load_config(explicit: Option<&std::path::Path>) -> Result<(ServiceConfig, Option<ConfigError>), ConfigError> {
    match explicit {
        Some(path) => Ok((ServiceConfig::load(path)?, None)),
        None => Ok(ServiceConfig::load_or_default(&ServiceConfig::default_path())),
    }
}

/// `RUST_LOG` wins over the configured filter. Library crates log through
/// `log`; the subscriber's log bridge picks those records up.
fn init_logging(configured: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}
