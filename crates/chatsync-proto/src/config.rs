use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::platform;
use crate::protocol::{AutoSelectConfig, MatchConfig, SelectionMode};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub matching: MatchConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Where the persisted replay settings (mode, thresholds, delay) live.
    #[serde(default = "default_settings_file")]
    pub settings_file: PathBuf,
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    /// IPC socket (unix path or windows pipe name) of the player to follow.
    #[serde(default = "default_mpv_socket")]
    pub socket: String,
    /// Extra arguments when chatsync launches mpv itself.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Where candidates and their event streams come from, either https:// URLs
/// or local paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// JSON array of candidates.
    #[serde(default = "default_catalog_source")]
    pub source: String,
    /// Directory holding `<id>.json` streams, or a URL template containing
    /// `{id}`.
    #[serde(default = "default_streams_source")]
    pub streams: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Debounce interval of the window poll.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            settings_file: default_settings_file(),
        }
    }
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

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            socket: default_mpv_socket(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            source: default_catalog_source(),
            streams: default_streams_source(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_settings_file() -> PathBuf {
    platform::data_dir().join("settings.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_mpv_socket() -> String {
    platform::mpv_socket_name()
}

fn default_catalog_source() -> String {
    platform::data_dir()
        .join("catalog.json")
        .display()
        .to_string()
}

fn default_streams_source() -> String {
    platform::data_dir().join("streams").display().to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
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

// ── Persisted replay settings ─────────────────────────────────────────────────

/// User choices that survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySettings {
    #[serde(default)]
    pub mode: SelectionMode,
    #[serde(default)]
    pub auto_select: AutoSelectConfig,
    /// Seconds added to every event offset; negative shows chat early.
    #[serde(default)]
    pub delay_secs: f64,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            mode: SelectionMode::default(),
            auto_select: AutoSelectConfig::default(),
            delay_secs: 0.0,
        }
    }
}

/// Injected get/set store for [`ReplaySettings`], so the session never
/// touches the filesystem itself.
pub trait SettingsProvider: Send {
    fn load(&self) -> ReplaySettings;
    fn store(&mut self, settings: &ReplaySettings) -> anyhow::Result<()>;
}

/// Settings kept as pretty JSON on disk.  A missing or unreadable file yields
/// the defaults.
pub struct JsonSettingsProvider {
    path: PathBuf,
}

impl JsonSettingsProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsProvider for JsonSettingsProvider {
    fn load(&self) -> ReplaySettings {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return ReplaySettings::default();
        };
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("settings: ignoring unreadable {}: {}", self.path.display(), e);
                ReplaySettings::default()
            }
        }
    }

    fn store(&mut self, settings: &ReplaySettings) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// In-memory provider; counts writes so callers can assert persistence.
#[derive(Debug, Default)]
pub struct MemorySettingsProvider {
    pub settings: ReplaySettings,
    pub writes: usize,
}

impl MemorySettingsProvider {
    pub fn new(settings: ReplaySettings) -> Self {
        Self {
            settings,
            writes: 0,
        }
    }
}

impl SettingsProvider for MemorySettingsProvider {
    fn load(&self) -> ReplaySettings {
        self.settings.clone()
    }

    fn store(&mut self, settings: &ReplaySettings) -> anyhow::Result<()> {
        self.settings = settings.clone();
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.replay.poll_interval_ms, 500);
        assert_eq!(config.matching.duration_tolerance_percent, 10.0);
        assert!(config.daemon.settings_file.ends_with("chatsync/settings.json"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [matching]
            duration_tolerance_percent = 3.0

            [catalog]
            source = "https://example.com/videos.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.matching.duration_tolerance_percent, 3.0);
        assert_eq!(config.matching.title_weight, 100);
        assert_eq!(config.catalog.source, "https://example.com/videos.json");
        assert!(config.catalog.streams.ends_with("streams"));
    }

    #[test]
    fn test_json_settings_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut provider = JsonSettingsProvider::new(&path);
        assert_eq!(provider.load(), ReplaySettings::default());

        let settings = ReplaySettings {
            mode: SelectionMode::Manual,
            auto_select: AutoSelectConfig {
                min_match_threshold: 70,
                match_margin_threshold: 10,
                notification_duration_secs: 0,
            },
            delay_secs: -1.5,
        };
        provider.store(&settings).unwrap();

        let reloaded = JsonSettingsProvider::new(&path).load();
        assert_eq!(reloaded, settings);
    }

    #[test]
    fn test_corrupt_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(JsonSettingsProvider::new(&path).load(), ReplaySettings::default());
    }
}
