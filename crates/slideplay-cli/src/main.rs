//! Slideplay CLI - Headless playback arbitration simulator
//!
//! Features:
//! - Scripted arbitration scenarios against simulated media elements
//! - Quality-variant resolution for given network/viewport signals
//! - Effective configuration inspection

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;
mod scenarios;

use scenarios::Scenario;

/// Slideplay CLI - Playback arbitration toolkit
#[derive(Parser)]
#[command(name = "slideplay")]
#[command(author = "Slideplay Developers")]
#[command(version)]
#[command(about = "Simulate and inspect feed playback arbitration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Configuration preset (default, mobile, desktop)
    #[arg(short, long, global = true, default_value = "default")]
    preset: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in arbitration scenario
    Scenario {
        /// Scenario to run
        #[arg(value_enum)]
        name: Option<Scenario>,

        /// Run every scenario
        #[arg(short, long, conflicts_with = "name")]
        all: bool,
    },

    /// Resolve a source for the given signals
    Resolve {
        /// Single URL source
        #[arg(long, conflicts_with_all = ["low", "mid", "high"])]
        url: Option<String>,

        /// Low quality variant URL
        #[arg(long)]
        low: Option<String>,

        /// Mid quality variant URL
        #[arg(long)]
        mid: Option<String>,

        /// High quality variant URL
        #[arg(long)]
        high: Option<String>,

        /// Measured downlink in Mbps
        #[arg(short, long)]
        downlink: Option<f64>,

        /// Effective connection type (slow-2g, 2g, 3g, 4g)
        #[arg(short, long)]
        effective_type: Option<String>,

        /// Data saver enabled
        #[arg(long)]
        save_data: bool,

        /// Viewport width in CSS pixels
        #[arg(short = 'w', long)]
        viewport: Option<u32>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output
    let level = if cli.verbose { "debug" } else { "info" };
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(level)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(level)
            .with_writer(std::io::stderr)
            .init();
    }

    slideplay_core::init();
    let config = commands::load_config(cli.config.as_deref(), &cli.preset)?;

    match cli.command {
        Commands::Scenario { name, all } => {
            let selected = match (name, all) {
                (Some(name), _) => vec![name],
                (None, true) => Scenario::ALL.to_vec(),
                (None, false) => {
                    commands::list_scenarios();
                    return Ok(());
                }
            };
            commands::scenario(&selected, &config, &cli.format).await?;
        }
        Commands::Resolve { url, low, mid, high, downlink, effective_type, save_data, viewport } => {
            let args = commands::ResolveArgs {
                url,
                low,
                mid,
                high,
                downlink,
                effective_type,
                save_data,
                viewport,
            };
            commands::resolve(args, &config, &cli.format)?;
        }
        Commands::Config => {
            commands::show_config(&config, &cli.format)?;
        }
    }

    Ok(())
}
