use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
}

/// The aggregator server.  Catalog, metadata and stream URLs all hang off
/// `base_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// Optional override for where the catalog comes from.  Either an
/// http(s) URL or a path to a local m3u8 file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
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
pub struct SocketConfig {
    #[serde(default = "default_socket_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    /// Initial mpv volume, 0.0..=1.0.
    #[serde(default = "default_volume")]
    pub volume: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
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

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            port: default_socket_port(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            volume: default_volume(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8888".to_string()
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8990
}

fn default_socket_port() -> u16 {
    platform::DEFAULT_SOCKET_PORT
}

fn default_volume() -> f32 {
    0.5
}

impl ServerConfig {
    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn catalog_url(&self) -> String {
        format!("{}/channels.m3u8", self.base())
    }

    pub fn metadata_url(&self, channel_id: &str) -> String {
        format!("{}/metadata/{}", self.base(), channel_id)
    }

    pub fn stream_url(&self, channel_id: &str) -> String {
        format!("{}/listen/{}", self.base(), channel_id)
    }
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

    /// Where to load the catalog from: the explicit override, or the
    /// server's playlist.
    pub fn catalog_source(&self) -> String {
        self.catalog
            .source
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.server.catalog_url())
    }
}
