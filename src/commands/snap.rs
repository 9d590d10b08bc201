// ABOUTME: `snap` command: dump a configured database into a snapshot file
// ABOUTME: Applies CLI overrides to the profile and shows progress with a spinner

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use super::ProfileArgs;
use crate::config::ProfileConfig;
use crate::events::{listener, SnapEvent};
use crate::snapper::Snapper;
use crate::utils::format_elapsed;

#[derive(Args, Clone, Debug)]
pub struct SnapArgs {
    #[command(flatten)]
    pub profile: ProfileArgs,
    /// Dump rows only (no table, view or routine DDL)
    #[arg(long, conflicts_with = "no_data")]
    pub data_only: bool,
    /// Dump DDL only (no rows)
    #[arg(long)]
    pub no_data: bool,
    /// Gzip the snapshot
    #[arg(long)]
    pub compress: bool,
    /// Directory the snapshot is written to
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Snapshot file name without extension
    #[arg(long)]
    pub output_file_name: Option<String>,
    /// Leave the generation date out of the snapshot
    #[arg(long)]
    pub skip_dump_date: bool,
}

impl SnapArgs {
    /// Command-line flags win over the profile.
    fn apply(&self, profile: &mut ProfileConfig) {
        if self.data_only {
            profile.data_only = true;
            profile.no_data = false;
        }
        if self.no_data {
            profile.no_data = true;
            profile.data_only = false;
        }
        if self.compress {
            profile.compress = true;
        }
        if self.skip_dump_date {
            profile.skip_dump_date = true;
        }
        if let Some(dir) = &self.output_dir {
            profile.output_dir = Some(dir.clone());
        }
        if let Some(name) = &self.output_file_name {
            profile.output_file_name = Some(name.clone());
        }
    }
}

pub async fn snap(args: SnapArgs) -> Result<()> {
    let mut profile = args.profile.load()?;
    args.apply(&mut profile);

    let config = profile
        .into_snapper_config()
        .with_context(|| format!("Invalid profile '{}'", args.profile.profile))?;
    let mut snapper = Snapper::new(config)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed}] {msg}")
            .context("Invalid spinner template")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let progress = spinner.clone();
    snapper.on_any(listener(move |event| {
        match event {
            SnapEvent::TableDumped { .. } | SnapEvent::Appended { .. } => {
                progress.println(format!("  {}", event))
            }
            _ => progress.set_message(event.to_string()),
        }
        Ok(())
    }));

    let result = snapper
        .connect_and_snap()
        .await
        .with_context(|| format!("Snapshot of profile '{}' failed", args.profile.profile));
    spinner.finish_and_clear();
    let summary = result?;

    println!(
        "Snapshot written to {} ({} tables, {} rows, {})",
        summary.path.display(),
        summary.tables,
        summary.rows,
        format_elapsed(summary.elapsed)
    );
    Ok(())
}
