//! Jayk - Main binary

use clap::{Parser, Subcommand};
use jayk_core::{BotConfig, Driver, ModuleParams};
use jayk_modules::builtin_catalog;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Jayk - A modular chatbot that keeps itself in line with its configuration
#[derive(Parser)]
#[command(name = "jayk")]
#[command(about = "A modular, self-reconciling IRC chatbot")]
#[command(version)]
struct Cli {
    /// Configuration file path (default: bots.toml, bots.json, bots.yaml or bots.yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Do not reload the configuration when the file changes
    #[arg(long)]
    no_watch: bool,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in modules
    Modules,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    if let Some(command) = cli.command {
        match command {
            Commands::Modules => show_modules(),
            Commands::Version => show_version(),
        }
        return Ok(());
    }

    let path = match cli.config {
        Some(path) => path,
        None => BotConfig::discover(std::env::current_dir()?)?,
    };
    info!("Loading configuration from {:?}", path);
    let config = BotConfig::from_file(&path)?;
    config.validate()?;

    if cli.test_config {
        info!("Configuration is valid ({} servers)", config.servers.len());
        return Ok(());
    }

    info!("Starting jayk {}", env!("CARGO_PKG_VERSION"));
    Driver::new(config, builtin_catalog())
        .with_config_path(&path)
        .run(!cli.no_watch)
        .await?;

    Ok(())
}

/// Initialize logging; `RUST_LOG` wins over `--log-level`
fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("cannot install log subscriber: {}", e))?;

    Ok(())
}

/// Show every module the catalog can build
fn show_modules() {
    let catalog = builtin_catalog();
    println!("Built-in modules");
    println!("================");
    for id in catalog.ids() {
        let params = ModuleParams::new(id, BTreeSet::new(), serde_json::Value::Null);
        match catalog.create(id, &params) {
            Ok(module) => {
                println!("{:<10} {} by {}", id, module.name(), module.author());
                println!("{:<10} {}", "", module.about());
            }
            Err(e) => println!("{:<10} (cannot build with defaults: {})", id, e),
        }
    }
}

/// Show version information
fn show_version() {
    println!("jayk {}", env!("CARGO_PKG_VERSION"));
}
