mod cli;
mod config;
mod http;
mod serve;

use clap::{Parser, Subcommand};
use config::ServerConfig;
use std::path::PathBuf;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "engram")]
#[command(about = "Knowledge-graph memory service for conversational agents")]
struct Cli {
    /// Path to engram.toml
    #[arg(long, env = "ENGRAM_CONFIG", default_value = "engram.toml")]
    config: PathBuf,

    /// Override the data directory
    #[arg(long, env = "ENGRAM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the long-running service
    Serve,

    /// Print node/edge/episode counts
    Stats,

    /// Query the audit log
    Audit(cli::AuditArgs),

    /// Export the full graph snapshot
    Export(cli::ExportArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ServerConfig::load_or_default(&cli.config)?;
    if let Some(data_dir) = &cli.data_dir {
        config.server.data_dir = data_dir.clone();
    }

    match cli.command {
        Commands::Serve => {
            config.ensure_data_dir()?;
            let errors = config.validate();
            if !errors.is_empty() {
                for e in &errors {
                    error!("Config error: {}", e);
                }
                anyhow::bail!("Invalid engram.toml configuration");
            }
            serve::run(config).await?;
        }

        Commands::Stats => {
            cli::stats::run(&config)?;
        }

        Commands::Audit(args) => {
            cli::audit::run(args, &config)?;
        }

        Commands::Export(args) => {
            cli::export::run(args, &config)?;
        }
    }

    Ok(())
}
