use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;
use super::protocol::{DownloadApi, Quality};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the download server's HTTP API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Default directory downloads are saved under, and the default search
    /// path for the playlist catalog.
    #[serde(default = "default_music_dir")]
    pub music_dir: PathBuf,
}

/// Defaults for the download form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub download_api: DownloadApi,
    #[serde(default)]
    pub download_lyrics_original: bool,
    #[serde(default)]
    pub download_lyrics_translated: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            music_dir: default_music_dir(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            download_api: DownloadApi::default(),
            download_lyrics_original: false,
            download_lyrics_translated: false,
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_music_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Music")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            paths: PathsConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}
