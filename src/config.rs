// Application configuration.
//
// Loaded from <config_dir>/juricast/config.json when it exists, then
// overridden by environment variables. Every field has a default so a
// missing file is not an error; only a malformed one is.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "juricast";
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_IP_LOOKUP_URL: &str = "https://api.ipify.org?format=json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Base URL of the hosted backend, e.g. https://xyz.supabase.co
    pub backend_url: Option<String>,
    pub api_key: Option<String>,
    pub ip_lookup_url: String,
    // Where the local fallback store and the log file live
    pub data_dir: Option<PathBuf>,
    pub log_level: String,
    pub player: PlayerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend_url: None,
            api_key: None,
            ip_lookup_url: DEFAULT_IP_LOOKUP_URL.to_string(),
            data_dir: None,
            log_level: "info".to_string(),
            player: PlayerSettings::default(),
        }
    }
}

/// Tuning knobs for the playback controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerSettings {
    /// Quiet period after the last time update before progress is saved.
    pub debounce_ms: u64,
    /// Safety-net save cadence while playing.
    pub periodic_save_secs: u64,
    /// Debounced saves at or below this percentage are discarded.
    pub min_progress_percent: u8,
    /// How many related episodes are queued automatically.
    pub queue_seed_limit: usize,
    pub skip_seconds: f64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        PlayerSettings {
            debounce_ms: 1500,
            periodic_save_secs: 5,
            min_progress_percent: 3,
            queue_seed_limit: 5,
            skip_seconds: 10.0,
        }
    }
}

impl PlayerSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_save_secs.max(1))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    // Environment lookups are injected so tests don't touch the process env
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("JURICAST_BACKEND_URL") {
            self.backend_url = Some(url);
        }
        if let Some(key) = lookup("JURICAST_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(dir) = lookup("JURICAST_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup("JURICAST_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .context("could not find a data directory")?
                .join(APP_DIR),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
        Ok(dir)
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}
