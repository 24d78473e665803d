//! tally: multi-institution account balance aggregator.
//!
//! Entry point. Loads environment and configuration, initialises structured
//! logging, and dispatches the init/validate/fetch subcommands.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use tally::config::Config;
use tally::core::Core;
use tally::providers::ProviderRegistry;
use tally::secrets::EnvSecretStore;
use tally::store::SqliteStore;
use tally::types::ExecutionContext;

#[derive(Parser)]
#[command(name = "tally", version, about = "Multi-institution account balance aggregator")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter configuration file and prepare the balance store.
    Init,
    /// Load and validate the configuration; non-zero exit when invalid.
    Validate,
    /// Fetch balances from every configured relationship.
    Fetch {
        /// Verbose provider stage logging and visible/verbose sessions.
        #[arg(long)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present so the env-backed secret store works locally.
    let _ = dotenv::dotenv();

    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Command::Init => init(&cli.config).await,
        Command::Validate => validate(&cli.config),
        Command::Fetch { debug } => fetch(&cli.config, debug).await,
    }
}

async fn init(config_path: &PathBuf) -> Result<()> {
    if config_path.exists() {
        bail!(
            "refusing to overwrite existing configuration at {}",
            config_path.display()
        );
    }
    std::fs::write(config_path, Config::default_file())
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    info!(path = %config_path.display(), "Wrote starter configuration");

    let mut core = build_core(config_path)?;
    core.init().await?;
    Ok(())
}

fn validate(config_path: &PathBuf) -> Result<()> {
    let core = build_core(config_path)?;
    let relationships = core.validate()?;

    info!(count = relationships.len(), "Configuration is valid");
    for (name, provider) in &relationships {
        info!(relationship = %name, provider = %provider, "Configured");
    }
    Ok(())
}

async fn fetch(config_path: &PathBuf, debug: bool) -> Result<()> {
    let mut core = build_core(config_path)?;
    let ctx = ExecutionContext { debug };

    let summary = core.fetch(&ctx).await?;
    println!("{summary}");

    if summary.failed() > 0 {
        warn!(
            failed = summary.failed(),
            "Some relationships failed; see the log above for details"
        );
    }
    Ok(())
}

fn build_core(config_path: &PathBuf) -> Result<Core> {
    // The store path lives in the configuration, so peek at it up front;
    // the core re-loads (and re-validates) at fetch time.
    let store_path = match Config::load(config_path) {
        Ok(config) => config.store_path,
        Err(e) => {
            debug!(error = %e, "Configuration unreadable while resolving the store path; using the default");
            "tally.sqlite".to_string()
        }
    };

    Ok(Core::new(
        config_path,
        ProviderRegistry::builtin(),
        Box::new(SqliteStore::new(store_path)),
        Box::new(EnvSecretStore),
    ))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tally=info"));

    let json_logging = std::env::var("TALLY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
