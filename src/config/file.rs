//! TOML configuration file loading
//!
//! Supports `~/.config/session-grid/config.toml` (or `$GRID_CONFIG`) as a
//! persistent config source. All fields are optional; the file is a partial
//! overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

use crate::data::Capabilities;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct GridConfigFile {
    /// Hub to register with when running as a node
    pub hub_url: Option<String>,

    #[serde(default)]
    pub server: ServerFileConfig,

    #[serde(default)]
    pub node: NodeFileConfig,

    #[serde(default)]
    pub distributor: DistributorFileConfig,

    #[serde(default)]
    pub queue: QueueFileConfig,
}

/// HTTP listener configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Address other components should use to reach this process
    pub external_url: Option<String>,
}

/// Local node configuration
#[derive(Debug, Default, Deserialize)]
pub struct NodeFileConfig {
    pub max_sessions: Option<usize>,
    pub session_timeout_secs: Option<u64>,
    pub heartbeat_secs: Option<u64>,
    /// Drain the node after this many sessions (0 disables)
    pub drain_after_sessions: Option<usize>,
    #[serde(default)]
    pub slots: Vec<SlotFileConfig>,
}

/// A group of identical slots backed by one driver endpoint
///
/// ```toml
/// [[node.slots]]
/// stereotype = { browserName = "chrome", platformName = "linux" }
/// count = 4
/// relay_url = "http://localhost:9515"
/// ```
#[derive(Debug, Deserialize)]
pub struct SlotFileConfig {
    pub stereotype: Capabilities,
    #[serde(default = "default_slot_count")]
    pub count: usize,
    pub relay_url: String,
}

const fn default_slot_count() -> usize {
    1
}

/// Placement configuration
#[derive(Debug, Default, Deserialize)]
pub struct DistributorFileConfig {
    pub health_check_secs: Option<u64>,
    pub heartbeat_misses_allowed: Option<u32>,
    pub reject_unsupported: Option<bool>,
}

/// New-session queue configuration
#[derive(Debug, Default, Deserialize)]
pub struct QueueFileConfig {
    pub retry_interval_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

/// Load the config file from the standard path
///
/// Returns `GridConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> GridConfigFile {
    let Some(path) = config_file_path() else {
        return GridConfigFile::default();
    };

    if !path.exists() {
        return GridConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                GridConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            GridConfigFile::default()
        }
    }
}

/// Return the config file path: `$GRID_CONFIG` or `~/.config/session-grid/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("GRID_CONFIG") {
        return Some(PathBuf::from(explicit));
    }
    directories::BaseDirs::new().map(|d| d.config_dir().join("session-grid").join("config.toml"))
}
