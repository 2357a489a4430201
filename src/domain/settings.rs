use crate::domain::models::LatencyMode;
use crate::infrastructure::bluetooth::protocol;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at an alternative settings file
pub const CONFIG_ENV_VAR: &str = "FLIC_BRIDGE_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default)]
    pub rotation: LogRotation,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: LogRotation::default(),
        }
    }
}

/// One switch accessory bound to one Flic button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryConfig {
    /// Bluetooth address of the button, `aa:bb:cc:dd:ee:ff`
    pub mac: String,
    #[serde(default = "default_accessory_name")]
    pub name: String,
    /// Reserved; every value currently behaves the same
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

impl AccessoryConfig {
    pub fn new(mac: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            name: default_accessory_name(),
            protocol: default_protocol(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub accessories: Vec<AccessoryConfig>,

    // Flic daemon
    #[serde(default = "default_flicd_host")]
    pub flicd_host: String,
    #[serde(default = "default_flicd_port")]
    pub flicd_port: u16,
    #[serde(default)]
    pub latency_mode: LatencyMode,

    // Gesture windowing
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    // Bridge control socket
    #[serde(default = "default_bridge_listen")]
    pub bridge_listen: String,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Settings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            accessories: Vec::new(),
            flicd_host: default_flicd_host(),
            flicd_port: default_flicd_port(),
            latency_mode: LatencyMode::default(),
            debounce_ms: default_debounce_ms(),
            bridge_listen: default_bridge_listen(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "flic_switch_bridge".to_string()
}
fn default_accessory_name() -> String {
    "Flic Button".to_string()
}
fn default_protocol() -> String {
    "all".to_string()
}
fn default_flicd_host() -> String {
    "localhost".to_string()
}
fn default_flicd_port() -> u16 {
    protocol::DEFAULT_PORT
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_bridge_listen() -> String {
    "127.0.0.1:51828".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from `$FLIC_BRIDGE_CONFIG` or the user config directory
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => PathBuf::from(path),
            None => Self::get_settings_path()?,
        };
        Self::from_path(settings_path)
    }

    /// Load settings from an explicit file. A missing file yields defaults.
    pub fn from_path(settings_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let settings_path = settings_path.into();
        let settings = if settings_path.exists() {
            Self::load_from_file(&settings_path)
                .with_context(|| format!("Failed to load {}", settings_path.display()))?
        } else {
            Settings::default()
        };

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("FlicSwitchBridge");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
