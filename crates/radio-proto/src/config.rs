use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub visualizer: VisualizerConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Playback core tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Delay between tearing down the metadata decoder and building the
    /// replacement element on fallback.
    #[serde(default = "default_fallback_settle_ms")]
    pub fallback_settle_ms: u64,
    /// Delay before binding the analysis source after a metadata-aware start.
    #[serde(default = "default_source_connect_ms")]
    pub source_connect_ms: u64,
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizerConfig {
    #[serde(default = "default_bars")]
    pub bars: usize,
    /// Exponent of the bin mapping curve; >1 gives low frequencies more bars.
    #[serde(default = "default_curve")]
    pub curve: f64,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// "bars" or "wave".
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_canvas_width")]
    pub width: u32,
    #[serde(default = "default_canvas_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Where favorites and the theme token persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_favorites_file")]
    pub favorites_file: PathBuf,
    #[serde(default = "default_theme_file")]
    pub theme_file: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            fallback_settle_ms: default_fallback_settle_ms(),
            source_connect_ms: default_source_connect_ms(),
            fft_size: default_fft_size(),
            smoothing: default_smoothing(),
        }
    }
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            bars: default_bars(),
            curve: default_curve(),
            fps: default_fps(),
            mode: default_mode(),
            width: default_canvas_width(),
            height: default_canvas_height(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            favorites_file: default_favorites_file(),
            theme_file: default_theme_file(),
        }
    }
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_volume() -> f32 {
    0.8
}

fn default_fallback_settle_ms() -> u64 {
    100
}

fn default_source_connect_ms() -> u64 {
    500
}

fn default_fft_size() -> usize {
    1024
}

fn default_smoothing() -> f32 {
    0.85
}

fn default_bars() -> usize {
    64
}

fn default_curve() -> f64 {
    1.8
}

fn default_fps() -> u32 {
    60
}

fn default_mode() -> String {
    "bars".to_string()
}

fn default_canvas_width() -> u32 {
    640
}

fn default_canvas_height() -> u32 {
    160
}

fn default_base_url() -> String {
    "https://de1.api.radio-browser.info/json".to_string()
}

fn default_page_size() -> u32 {
    20
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_favorites_file() -> PathBuf {
    platform::data_dir().join("favorites.json")
}

fn default_theme_file() -> PathBuf {
    platform::data_dir().join("theme")
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
