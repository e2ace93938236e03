use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub reporter: ReporterConfig,
    #[serde(default)]
    pub artwork: ArtworkConfig,
}

/// Socket server that reporters and control surfaces connect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_hub_port")]
    pub port: u16,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Period of the regular update cycle, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtworkConfig {
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Prefix of the YouTube thumbnail host; `<base>/<video id>/<file>.jpg`.
    #[serde(default = "default_youtube_base_url")]
    pub youtube_base_url: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_hub_port(),
            log_file: default_log_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            youtube_base_url: default_youtube_base_url(),
        }
    }
}

impl HubConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_hub_port() -> u16 {
    platform::HUB_TCP_PORT
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("hub.log")
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    9878
}

fn default_interval_ms() -> u64 {
    1500
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_youtube_base_url() -> String {
    crate::artwork::YOUTUBE_THUMBNAIL_BASE.to_string()
}

impl Config {
    /// Load from the default location, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// For tools that can run without a config: a broken file is logged
    /// and left alone, and defaults are used instead.
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(&Self::config_path())
    }

    pub fn load_or_default_from(config_path: &Path) -> Self {
        Self::load_from(config_path).unwrap_or_else(|e| {
            warn!(
                "config {} unusable, using defaults: {:#}",
                config_path.display(),
                e
            );
            Self::default()
        })
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.hub.port, 9877);
        assert_eq!(config.http.port, 9878);
        assert_eq!(config.hub.bind_address, "127.0.0.1");
        assert_eq!(config.reporter.interval_ms, 1500);
        assert!(config.artwork.youtube_base_url.starts_with("https://"));
        assert!(config.hub.log_file.ends_with("nowplaying/hub.log"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str("[reporter]\ninterval_ms = 250\n").unwrap();
        assert_eq!(config.reporter.interval_ms, 250);
        assert_eq!(config.hub.address(), "127.0.0.1:9877");
        assert_eq!(config.artwork.probe_timeout_ms, 5000);
    }

    #[test]
    fn test_load_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let first = Config::load_from(&path).unwrap();
        assert!(path.exists());

        let second = Config::load_from(&path).unwrap();
        assert_eq!(first.http.port, second.http.port);
        assert_eq!(first.artwork.youtube_base_url, second.artwork.youtube_base_url);
    }

    #[test]
    fn test_broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[reporter]\ninterval_ms = \"soon\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
        let config = Config::load_or_default_from(&path);
        assert_eq!(config.reporter.interval_ms, 1500);
        assert!(std::fs::read_to_string(&path).unwrap().contains("soon"));
    }
}
