use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persisted settings. Currently just the last-used output directory,
/// written whenever the user changes the destination folder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Config {
    /// Load from the config file, falling back to defaults when it does not
    /// exist yet or cannot be parsed.
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        Self::load_from(&path)
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path().context("could not determine config directory")?;
        self.save_to(&path)
    }

    fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Ignoring malformed config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                debug!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }
}

fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "screenrec").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn default_output_dir() -> PathBuf {
    if let Some(dirs) = UserDirs::new() {
        if let Some(videos) = dirs.video_dir() {
            return videos.to_path_buf();
        }
        return dirs.home_dir().join("Videos");
    }
    PathBuf::from("Videos")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trips_through_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            output_dir: PathBuf::from("/home/user/Captures"),
        };
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = Config::load_from(&dir.path().join("nope.toml"));
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "output_dir = [not toml").unwrap();

        assert_eq!(Config::load_from(&path), Config::default());
    }
}
