//! Command-line front end for geographic cutouts.
//!
//! Builds or opens a cutout file, lists the features the built-in
//! providers offer and prepares them into the cutout.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use commands::{ExportArgs, FeaturesArgs, InspectArgs, PrepareArgs};

#[derive(Parser, Debug)]
#[command(name = "georetriever")]
#[command(about = "Build geographic cutouts and prepare geoscience features into them")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// YAML file with retriever settings (defaults to environment variables)
    #[arg(long, global = true, env = "GEORETRIEVER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the features each provider offers
    Features(FeaturesArgs),
    /// Open or build a cutout and prepare features into it
    Prepare(PrepareArgs),
    /// Summarise a persisted cutout
    Inspect(InspectArgs),
    /// Write a copy of a cutout to another file
    Export(ExportArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    if args.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    let config = commands::load_config(args.config.as_deref())?;
    debug!(?config, "Loaded configuration");

    match args.command {
        Command::Features(cmd) => commands::features(cmd),
        Command::Prepare(cmd) => commands::prepare(cmd, config).await,
        Command::Inspect(cmd) => commands::inspect(cmd, &config).await,
        Command::Export(cmd) => commands::export(cmd, &config).await,
    }
}
