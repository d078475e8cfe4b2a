use anyhow::{Context, Result};
use directories::ProjectDirs;
use hashback_core::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Settings read from `config.toml`. Command-line flags take precedence.
///
/// ```toml
/// destination = "/mnt/backups/documents"
/// hash_algorithm = "blake3"
/// exclude = ["*.tmp", "node_modules/"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub destination: Option<PathBuf>,
    pub hash_algorithm: Option<HashAlgorithm>,
    pub exclude: Vec<String>,
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "hashback").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads `explicit` if given (it must exist), otherwise the default config file if
    /// present, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => {
                    debug!("No configuration file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
