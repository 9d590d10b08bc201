// ABOUTME: `restore` command: replay a snapshot into the profile's database
// ABOUTME: Runs the blocking client pipe off the async runtime

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::ProfileArgs;
use crate::restore::Restorer;
use crate::writer;

#[derive(Args, Clone, Debug)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub profile: ProfileArgs,
    /// Snapshot to replay (defaults to the profile's snapshot path)
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Client binary to pipe the snapshot into
    #[arg(long, default_value = crate::restore::MYSQL_CLIENT)]
    pub client: String,
}

pub async fn restore(args: RestoreArgs) -> Result<()> {
    let profile = args.profile.load()?;
    let target = profile
        .connection_params()
        .with_context(|| format!("Invalid profile '{}'", args.profile.profile))?;

    let file = match args.file {
        Some(file) => file,
        None => writer::snapshot_path(
            profile
                .output_dir
                .as_deref()
                .unwrap_or_else(|| std::path::Path::new(".")),
            profile
                .output_file_name
                .as_deref()
                .unwrap_or(&target.database),
            profile.compress,
        ),
    };

    let client = args.client;
    let snapshot = file.clone();
    tokio::task::spawn_blocking(move || {
        Restorer::new()
            .with_client(client)
            .restore(&target, &snapshot)
    })
    .await
    .context("Restore task panicked")??;

    println!("Restored {}", file.display());
    Ok(())
}
