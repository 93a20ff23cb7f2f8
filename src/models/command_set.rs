//! Saved Command Sets
//!
//! A command set is a named list of unresolved template picks that an
//! operator can store and replay against any device. Only the picks are
//! persisted; expansion happens again at dispatch time.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::batch::TemplatePick;
use crate::error::{Error, Result};

/// Named list of template picks
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandSet {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub picks: Vec<TemplatePick>,
}

impl CommandSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, pick: TemplatePick) {
        self.picks.push(pick);
    }

    pub fn is_empty(&self) -> bool {
        self.picks.is_empty()
    }

    /// Load a command set, choosing JSON or TOML by file extension
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::ConfigLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| Error::ConfigParseFailed {
                format: "JSON".to_string(),
                reason: e.to_string(),
            }),
            _ => toml::from_str(&content).map_err(|e| Error::ConfigParseFailed {
                format: "TOML".to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Save the command set, choosing JSON or TOML by file extension
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self).map_err(|e| {
                Error::ConfigSerializationFailed {
                    format: "JSON".to_string(),
                    reason: e.to_string(),
                }
            })?,
            _ => toml::to_string_pretty(self).map_err(|e| Error::ConfigSerializationFailed {
                format: "TOML".to_string(),
                reason: e.to_string(),
            })?,
        };

        fs::write(path, content)?;
        debug!("Saved command set '{}' to {}", self.name, path.display());
        Ok(())
    }
}
