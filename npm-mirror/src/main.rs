mod commands;
mod formatting;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "npm-mirror")]
#[command(about = "Mirror an npm registry onto local storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file; defaults to ./npm-mirror.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(short, long, action, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the whole registry.
    Sync {
        #[command(flatten)]
        mirror: MirrorArgs,
        #[arg(long, action)]
        json: bool,
    },
    /// Mirror only the named packages.
    Package {
        #[arg(required = true)]
        names: Vec<String>,
        #[command(flatten)]
        mirror: MirrorArgs,
        #[arg(long, action)]
        json: bool,
    },
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug, Default, Clone)]
pub struct MirrorArgs {
    /// Upstream registry URL.
    #[arg(long)]
    pub from: Option<String>,
    /// Directory the mirror is written to.
    #[arg(long)]
    pub to: Option<PathBuf>,
    /// URL the mirror will be served from.
    #[arg(long)]
    pub server: Option<String>,
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,
    /// Stop early when the registry index is unchanged.
    #[arg(long, action)]
    pub no_recheck: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();

    match cli.command {
        Commands::Sync { mirror, json } => {
            let config = commands::resolve_config(cli.config.as_deref(), &mirror)?;
            commands::cmd_sync(config, json)?
        }
        Commands::Package {
            names,
            mirror,
            json,
        } => {
            let config = commands::resolve_config(cli.config.as_deref(), &mirror)?;
            commands::cmd_package(config, names, json)?
        }
    }

    Ok(())
}
