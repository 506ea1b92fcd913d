// ==========================================
// ENGINE CONFIGURATION
// ==========================================
// Settings live in a JSON file under the user's config directory
// (e.g. ~/.config/podplay/config.json). A missing file means defaults.
// A few endpoint settings can be overridden through environment variables.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PlayerError, Result};
use crate::format::clamp_volume;

const APP_DIR: &str = "podplay";
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 15_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub playback: PlaybackConfig,
    pub stream: StreamConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Pause between natural end of an episode and loading the next one
    pub auto_advance_delay_ms: u64,
    /// Step used by the skip keys and the media-control seek actions
    pub skip_seconds: f64,
    /// Minimum playback movement between two progress writes
    pub progress_persist_interval_secs: f64,
    pub default_volume: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        PlaybackConfig {
            auto_advance_delay_ms: 1000,
            skip_seconds: 15.0,
            progress_persist_interval_secs: 10.0,
            default_volume: 1.0,
        }
    }
}

impl PlaybackConfig {
    pub fn auto_advance_delay(&self) -> Duration {
        Duration::from_millis(self.auto_advance_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub stream_url_endpoint: String,
    pub metadata_endpoint: String,
    pub metadata_poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub default_volume: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            stream_url_endpoint: "http://localhost:8000/api/stream/url".to_string(),
            metadata_endpoint: "http://localhost:8000/api/stream/metadata".to_string(),
            metadata_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_secs: 10,
            default_volume: 0.8,
        }
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.metadata_poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
    pub session_ttl_hours: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: None,
            session_ttl_hours: 24,
        }
    }
}

impl StorageConfig {
    /// Directory holding session records and the log file
    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join(APP_DIR))
                .ok_or_else(|| PlayerError::Config("Could not find data directory".to_string())),
        }
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }
}

impl EngineConfig {
    /// Default location: <config dir>/podplay/config.json
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Loads the config file (or defaults), then applies env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path(),
        };

        let mut config = match path {
            Some(path) if path.exists() => {
                let data = fs::read_to_string(&path).map_err(|e| {
                    PlayerError::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                serde_json::from_str(&data).map_err(|e| {
                    PlayerError::Config(format!("Failed to parse {}: {}", path.display(), e))
                })?
            }
            _ => EngineConfig::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.normalize();
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("PODPLAY_STREAM_URL_ENDPOINT") {
            self.stream.stream_url_endpoint = url;
        }
        if let Some(url) = lookup("PODPLAY_METADATA_ENDPOINT") {
            self.stream.metadata_endpoint = url;
        }
        if let Some(ms) = lookup("PODPLAY_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.stream.metadata_poll_interval_ms = ms;
        }
    }

    fn normalize(&mut self) {
        self.playback.default_volume = clamp_volume(self.playback.default_volume);
        self.stream.default_volume = clamp_volume(self.stream.default_volume);
        if self.stream.metadata_poll_interval_ms == 0 {
            self.stream.metadata_poll_interval_ms = DEFAULT_POLL_INTERVAL_MS;
        }
        if self.playback.skip_seconds.is_nan() || self.playback.skip_seconds <= 0.0 {
            self.playback.skip_seconds = PlaybackConfig::default().skip_seconds;
        }
    }
}
