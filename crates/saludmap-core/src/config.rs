//! Application configuration management.
//!
//! Configuration is stored at `~/.config/saludmap/config.json`. Every field
//! has a default, so a missing or partial file is fine. Environment
//! variables override the file:
//! - `SALUDMAP_API_BASE_URL`: places API base URL
//! - `SALUDMAP_DATA_DIR`: store location

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::places::DEFAULT_SEARCH_RADIUS_M;
use crate::prefetch::{DEFAULT_PREFETCH_CONCURRENCY, DEFAULT_PREFETCH_ZOOMS};
use crate::store::{DEFAULT_API_MAX_AGE_DAYS, DEFAULT_NEARBY_RADIUS_M, DEFAULT_TILE_MAX_AGE_DAYS};

/// Application name used for config/data directory paths
const APP_NAME: &str = "saludmap";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const API_BASE_URL_ENV: &str = "SALUDMAP_API_BASE_URL";
const DATA_DIR_ENV: &str = "SALUDMAP_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub tile_url_template: String,
    /// Substring identifying tile requests for the proxy.
    pub tile_host: String,
    /// Path segment identifying places API requests for the proxy.
    pub places_path: String,
    /// Origin of the front end's own assets, served cache-first.
    pub static_origin: Option<String>,
    /// Overrides the default store location.
    pub data_dir: Option<PathBuf>,
    pub places_radius_m: u32,
    pub nearby_radius_m: f64,
    pub tile_max_age_days: i64,
    /// Cached places API responses older than this are evicted.
    pub api_max_age_days: i64,
    pub prefetch_zooms: Vec<u8>,
    pub prefetch_concurrency: usize,
    pub ip_locate_url: String,
    /// Start without network access. Not persisted; set by the front end.
    #[serde(skip)]
    pub offline: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            tile_url_template: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            tile_host: "tile.openstreetmap.org".to_string(),
            places_path: "/places".to_string(),
            static_origin: None,
            data_dir: None,
            places_radius_m: DEFAULT_SEARCH_RADIUS_M,
            nearby_radius_m: DEFAULT_NEARBY_RADIUS_M,
            tile_max_age_days: DEFAULT_TILE_MAX_AGE_DAYS,
            api_max_age_days: DEFAULT_API_MAX_AGE_DAYS,
            prefetch_zooms: DEFAULT_PREFETCH_ZOOMS.to_vec(),
            prefetch_concurrency: DEFAULT_PREFETCH_CONCURRENCY,
            ip_locate_url: "http://ip-api.com/json".to_string(),
            offline: false,
        }
    }
}

impl Config {
    /// Load the config file (defaults when absent), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        debug!(api = %config.api_base_url, "Config loaded");
        Ok(config)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Root directory of the durable store.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Out of range values fall back to the default.
    pub fn tile_max_age(&self) -> chrono::Duration {
        days_or_default(self.tile_max_age_days, DEFAULT_TILE_MAX_AGE_DAYS)
    }

    pub fn api_max_age(&self) -> chrono::Duration {
        days_or_default(self.api_max_age_days, DEFAULT_API_MAX_AGE_DAYS)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(API_BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(dir) = var(DATA_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }
}

fn days_or_default(days: i64, default: i64) -> chrono::Duration {
    match chrono::Duration::try_days(days) {
        Some(age) if days >= 0 => age,
        _ => {
            warn!(days, default, "Invalid max age in config, using default");
            chrono::Duration::days(default)
        }
    }
}
