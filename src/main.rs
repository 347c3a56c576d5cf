use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pagesmith::telemetry::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "pagesmith")]
#[command(version, about = "Generate, publish, and report static sites from build briefs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file. Defaults to ./pagesmith.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Also write JSON logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Accept build requests over HTTP
    Serve {
        /// Override the configured listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one round from a JSON request file and print the report
    Run {
        #[arg(short, long)]
        request: PathBuf,
    },
    /// View and validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration with secrets masked
    Show,
    /// Check that serve/run have everything they need
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = telemetry::init_tracing(cli.log_format, cli.verbose, cli.log_dir.as_deref());
    let config = cli.config.as_deref();

    match &cli.command {
        Commands::Serve { port } => cmd::cmd_serve(config, *port).await?,
        Commands::Run { request } => cmd::cmd_run(config, request).await?,
        Commands::Config { command } => cmd::cmd_config(config, command.clone())?,
    }

    Ok(())
}
