//! Configuration File Loading
//!
//! Finds and loads the configuration from an explicit path, the
//! `SWITCHBOARD_CONFIG` environment variable, or the usual search
//! locations, falling back to defaults when nothing is found.

use super::Config;
use crate::error::{Error, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file
pub const CONFIG_ENV_VAR: &str = "SWITCHBOARD_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Format implied by a file extension; TOML when unknown
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }

    fn label(self) -> &'static str {
        match self {
            ConfigFormat::Toml => "TOML",
            ConfigFormat::Json => "JSON",
        }
    }
}

/// Configuration file loader
pub struct ConfigLoader {
    /// Base paths tried with each supported extension
    search_paths: Vec<PathBuf>,
    /// Path from the environment, tried before the search paths
    env_path: Option<PathBuf>,
    /// File the configuration came from, if any
    current_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            search_paths: Self::default_search_paths(),
            env_path: env::var_os(CONFIG_ENV_VAR).map(PathBuf::from),
            current_path: None,
        }
    }

    /// Loader that only looks at the given base paths
    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            env_path: None,
            current_path: None,
        }
    }

    /// Load and validate the configuration
    ///
    /// An explicit path must exist. Without one, the environment variable
    /// and search paths are tried in order and defaults are used when no
    /// file is found.
    pub fn load(&mut self, explicit: Option<&Path>) -> Result<Config> {
        let config = match explicit.or(self.env_path.as_deref()) {
            Some(path) => {
                let path = path.to_path_buf();
                let config = Self::load_from_path(&path)?;
                self.current_path = Some(path);
                config
            }
            None => match self.find_and_load()? {
                Some((path, config)) => {
                    self.current_path = Some(path);
                    config
                }
                None => {
                    debug!("No configuration file found, using defaults");
                    Config::default()
                }
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Load a specific file, choosing the format by extension
    pub fn load_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| Error::ConfigLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let format = ConfigFormat::from_path(path);
        let config: Config = match format {
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| e.to_string()),
        }
        .map_err(|reason| Error::ConfigParseFailed {
            format: format.label().to_string(),
            reason,
        })?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration, choosing the format by extension
    pub fn save_to_path(config: &Config, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let format = ConfigFormat::from_path(path);
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::to_string_pretty(config).map_err(|e| e.to_string()),
        }
        .map_err(|reason| Error::ConfigSerializationFailed {
            format: format.label().to_string(),
            reason,
        })?;

        fs::write(path, content)?;
        Ok(())
    }

    fn find_and_load(&self) -> Result<Option<(PathBuf, Config)>> {
        for base in &self.search_paths {
            for format in [ConfigFormat::Toml, ConfigFormat::Json] {
                let path = base.with_extension(format.extension());
                if !path.exists() {
                    continue;
                }
                match Self::load_from_path(&path) {
                    Ok(config) => return Ok(Some((path, config))),
                    Err(e) => {
                        // Keep searching; a broken file should not hide a good one
                        warn!("Skipping config {}: {}", path.display(), e);
                    }
                }
            }
        }
        Ok(None)
    }

    /// Base paths searched when nothing explicit is given
    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("switchboard").join("config"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".switchboard").join("config"));
        }

        if let Ok(cwd) = env::current_dir() {
            paths.push(cwd.join("switchboard"));
        }

        paths
    }

    /// File the loaded configuration came from
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
