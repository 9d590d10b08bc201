// ABOUTME: CLI entry point for db-snapper
// ABOUTME: Parses commands and routes to the snap and restore handlers

use clap::{Parser, Subcommand};
use db_snapper::commands;

#[derive(Parser)]
#[command(name = "db-snapper")]
#[command(about = "Configuration-driven MySQL snapshots", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump a database into a snapshot file
    Snap {
        #[command(flatten)]
        args: commands::snap::SnapArgs,
    },
    /// Replay a snapshot file into a database
    Restore {
        #[command(flatten)]
        args: commands::restore::RestoreArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Snap { args } => commands::snap(args).await,
        Commands::Restore { args } => commands::restore(args).await,
    }
}
