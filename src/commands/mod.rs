// ABOUTME: Command implementations for the db-snapper CLI
// ABOUTME: Exports snap and restore plus shared profile loading

pub mod restore;
pub mod snap;

pub use restore::restore;
pub use snap::snap;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use crate::config::{ConfigFile, ProfileConfig, CONFIG_FILE_NAME};

/// Options shared by every command that reads a profile.
#[derive(Args, Clone, Debug)]
pub struct ProfileArgs {
    /// Profile to use from the configuration file
    #[arg(long, short = 'p')]
    pub profile: String,
    /// Path to the configuration file (defaults to ./snapper.toml, then ~/.config/db-snapper/snapper.toml)
    #[arg(long = "config", env = "DB_SNAPPER_CONFIG")]
    pub config_path: Option<PathBuf>,
}

impl ProfileArgs {
    /// Load the configuration file and resolve the selected profile.
    pub fn load(&self) -> Result<ProfileConfig> {
        let path = match &self.config_path {
            Some(path) => path.clone(),
            None => ConfigFile::default_path().with_context(|| {
                format!(
                    "No configuration file found. Create ./{} or pass --config",
                    CONFIG_FILE_NAME
                )
            })?,
        };
        load_profile(&path, &self.profile)
    }
}

fn load_profile(path: &Path, profile: &str) -> Result<ProfileConfig> {
    let file = ConfigFile::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    file.resolve(profile).with_context(|| {
        format!(
            "Failed to resolve profile '{}' (available: {})",
            profile,
            file.profile_names().join(", ")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_profile_lists_available_profiles_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapper.toml");
        std::fs::write(&path, "[profiles.prod]\nusername = \"u\"\n").unwrap();

        assert!(load_profile(&path, "prod").is_ok());
        let err = format!("{:#}", load_profile(&path, "staging").unwrap_err());
        assert!(err.contains("available: prod"));
    }

    #[test]
    fn test_explicit_missing_config_fails() {
        let args = ProfileArgs {
            profile: "prod".into(),
            config_path: Some(PathBuf::from("/nonexistent/snapper.toml")),
        };
        assert!(args.load().is_err());
    }
}
