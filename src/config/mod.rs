//! Configuration management
//!
//! Two layers: service settings (how this process behaves, loaded from an
//! optional settings file plus `ROOM_*` environment variables) and the room
//! configuration document handled by [`store::ConfigStore`].

pub mod store;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

pub use store::{ConfigStore, OutputSpec, RoomConfig, RoomInformation, SourceSpec};

/// Room config file name, relative to the config directory
const ROOM_CONFIG_FILE: &str = "user/config.json";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Room configuration document; defaults to `<config dir>/user/config.json`
    #[serde(default)]
    pub room_config: Option<PathBuf>,

    #[serde(default)]
    pub panel: PanelSettings,

    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            room_config: None,
            panel: PanelSettings::default(),
            cloud: CloudSettings::default(),
            orchestrator: OrchestratorSettings::default(),
        }
    }
}

impl Settings {
    pub fn room_config_path(&self) -> PathBuf {
        self.room_config
            .clone()
            .unwrap_or_else(|| get_config_dir().join(ROOM_CONFIG_FILE))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PanelSettings {
    #[serde(default = "default_panel_address")]
    pub address: u32,
    #[serde(default = "default_preview_username")]
    pub preview_username: String,
    #[serde(default = "default_preview_password")]
    pub preview_password: String,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            address: default_panel_address(),
            preview_username: default_preview_username(),
            preview_password: default_preview_password(),
        }
    }
}

fn default_panel_address() -> u32 {
    0x03
}

fn default_preview_username() -> String {
    "user".to_string()
}

fn default_preview_password() -> String {
    "password".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_system_check_delay_ms")]
    pub system_check_delay_ms: u64,
    #[serde(default = "default_alert_debounce_ms")]
    pub alert_debounce_ms: u64,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            system_check_delay_ms: default_system_check_delay_ms(),
            alert_debounce_ms: default_alert_debounce_ms(),
        }
    }
}

impl CloudSettings {
    pub fn system_check_delay(&self) -> Duration {
        Duration::from_millis(self.system_check_delay_ms)
    }

    pub fn alert_debounce(&self) -> Duration {
        Duration::from_millis(self.alert_debounce_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_system_check_delay_ms() -> u64 {
    2000
}

fn default_alert_debounce_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    /// Output index every source selection is routed to
    #[serde(default = "default_output")]
    pub default_output: i32,
    #[serde(default = "default_volume")]
    pub default_volume: u16,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Treat a source selection while off as an implicit power-on
    #[serde(default)]
    pub select_source_powers_on: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_output: default_output(),
            default_volume: default_volume(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            event_queue_capacity: default_event_queue_capacity(),
            select_source_powers_on: false,
        }
    }
}

impl OrchestratorSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_output() -> i32 {
    1
}

fn default_volume() -> u16 {
    50
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_event_queue_capacity() -> usize {
    crate::bus::DEFAULT_EVENT_CAPACITY
}

/// Get config directory (ROOM_CONFIG_DIR or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ROOM_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support/av-room-control");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("av-room-control");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config/av-room-control");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("av-room-control");
        }
    }

    // Fallback to current directory
    PathBuf::from(".")
}

/// Load service settings: defaults, then `<config dir>/settings.*`, then `ROOM_*` env vars
pub fn load_settings() -> Result<Settings> {
    let config_dir = get_config_dir();

    let config = ::config::Config::builder()
        .set_default("log_level", default_log_level())?
        .add_source(
            ::config::File::with_name(&config_dir.join("settings").to_string_lossy())
                .required(false),
        )
        // ROOM_LOG_LEVEL, ROOM_CLOUD__ENABLED, ROOM_ORCHESTRATOR__DEFAULT_OUTPUT, ...
        .add_source(
            ::config::Environment::with_prefix("ROOM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}
