//! Configuration for the drishti-link daemon
//!
//! Loads configuration from a TOML file covering the link endpoints, the
//! tile fetch pipeline, routing and logging.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub tiles: TilesConfig,
    pub nav: NavConfig,
    pub logging: LoggingConfig,
}

/// Link endpoints (primary and fallback listening addresses)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Primary bind address for inbound display connections
    ///
    /// Examples:
    /// - `0.0.0.0:7400` - Bind to all interfaces on port 7400
    /// - `127.0.0.1:7400` - Localhost only
    pub primary_bind: String,

    /// Fallback bind address, accepted in parallel with the primary
    pub fallback_bind: String,
}

/// Tile fetch pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TilesConfig {
    /// Ordered tile server URL templates with `{z}`/`{x}`/`{y}` placeholders;
    /// the first template returning a decodable image wins
    pub url_templates: Vec<String>,

    /// User-Agent sent to tile servers (public servers require one)
    pub user_agent: String,

    /// Maximum number of tiles kept in memory
    pub cache_capacity: usize,

    /// Worker threads for concurrent tile fetches
    pub fetch_workers: usize,
}

/// Routing backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NavConfig {
    /// OSRM server root, e.g. `https://router.project-osrm.org`
    pub osrm_url: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Default configuration
    ///
    /// Suitable for testing and development. Production deployments
    /// should use a proper TOML configuration file.
    pub fn defaults() -> Self {
        Self {
            link: LinkConfig {
                primary_bind: "0.0.0.0:7400".to_string(),
                fallback_bind: "0.0.0.0:7401".to_string(),
            },
            tiles: TilesConfig {
                url_templates: vec![
                    "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
                ],
                user_agent: "drishti-link/0.2".to_string(),
                cache_capacity: 200,
                fetch_workers: 4,
            },
            nav: NavConfig {
                osrm_url: "https://router.project-osrm.org".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| crate::error::Error::Config(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::defaults()
    }
}
