//! Controller settings
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! session_name = "avpn0"
//! store_dir = "/data/avpn"
//! dns_route_brands = ["samsung"]
//! ```

use crate::builder::DNS_HOST_ROUTE_BRANDS;
use crate::config::DEFAULT_SESSION_NAME;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Session name used when a request does not carry one
    pub session_name: String,
    /// Directory holding the persisted last good configuration
    pub store_dir: Option<PathBuf>,
    /// Device brands that need a host route for every DNS server
    pub dns_route_brands: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            session_name: DEFAULT_SESSION_NAME.to_string(),
            store_dir: None,
            dns_route_brands: DNS_HOST_ROUTE_BRANDS.iter().map(|b| b.to_string()).collect(),
        }
    }
}

impl Settings {
    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        toml::from_str(content)
            .map_err(|e| SettingsError::ParseError(e.to_string()))
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Settings errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}
