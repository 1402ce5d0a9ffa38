use alexandria::{config, encryption, server};
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "alexandria",
    version,
    about = "Persistent memory tier for a multi-agent swarm"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the vault service (HTTP API, subscriber, semantic worker)
    Serve,
    /// Generate a fresh encryption key for ENCRYPTION_KEY
    Keygen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::AlexandriaConfig::load()?;

    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Serve => {
            server::serve(config).await?;
        }
        Command::Keygen => {
            println!("{}", encryption::Encryptor::generate_key());
        }
    }

    Ok(())
}
