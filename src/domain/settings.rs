use crate::infrastructure::bluetooth::protocol;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_DIR_NAME: &str = "MochiLink";

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
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
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
            rotation: default_rotation(),
        }
    }
}

/// Radio-side parameters. The UUIDs must match the firmware exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleSettings {
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default = "default_data_uuid")]
    pub data_char_uuid: String,
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            data_char_uuid: default_data_uuid(),
            name_prefix: default_name_prefix(),
            scan_window_ms: default_scan_window_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Fixed waits standing in for real synchronization.
///
/// Both were found empirically against one firmware revision and may need
/// retuning for others; nothing in the protocol guarantees them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Wait after negotiation before time sync traffic.
    #[serde(default = "default_stabilization_delay_ms")]
    pub stabilization_delay_ms: u64,
    /// Wait between a write and the read that depends on it.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl TimingSettings {
    pub fn stabilization_delay(&self) -> Duration {
        Duration::from_millis(self.stabilization_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            stabilization_delay_ms: default_stabilization_delay_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSyncSettings {
    #[serde(default = "default_time_api_url")]
    pub api_base_url: String,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_dst_offset_secs")]
    pub dst_offset_secs: i64,
}

impl Default for TimeSyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_time_api_url(),
            default_timezone: default_timezone(),
            request_timeout_ms: default_request_timeout_ms(),
            dst_offset_secs: default_dst_offset_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub ble: BleSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub time_sync: TimeSyncSettings,
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
    "mochi_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.to_string()
}
fn default_data_uuid() -> String {
    protocol::DATA_CHAR_UUID.to_string()
}
fn default_name_prefix() -> String {
    protocol::DEVICE_NAME_PREFIX.to_string()
}
fn default_scan_window_ms() -> u64 {
    4000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_stabilization_delay_ms() -> u64 {
    1000
}
fn default_settle_delay_ms() -> u64 {
    200
}
fn default_time_api_url() -> String {
    "https://timeapi.io".to_string()
}
fn default_timezone() -> String {
    "Europe/Rome".to_string()
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_dst_offset_secs() -> i64 {
    3600
}

/// Config directory shared by the settings file and the preference store.
pub fn app_config_dir() -> anyhow::Result<PathBuf> {
    let mut path = dirs::config_dir().context("Could not determine config directory")?;
    path.push(APP_DIR_NAME);
    Ok(path)
}

pub struct SettingsService {
    settings: AppSettings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let path = app_config_dir()?.join("settings.json");
        Ok(Self::open(path))
    }

    /// Load from `path`, falling back to defaults when missing or unreadable.
    pub fn open(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn load_from_file(path: &Path) -> anyhow::Result<AppSettings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
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

    pub fn get(&self) -> &AppSettings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut AppSettings {
        &mut self.settings
    }

    /// Remember a different advertised name prefix. Writes only on change.
    pub fn set_name_prefix(&mut self, prefix: &str) -> anyhow::Result<()> {
        if self.settings.ble.name_prefix != prefix {
            self.settings.ble.name_prefix = prefix.to_string();
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_firmware() {
        let s = AppSettings::default();
        assert_eq!(s.ble.service_uuid, "4fafc201-1fb5-459e-8fcc-c5c9c331914b");
        assert_eq!(s.ble.data_char_uuid, "beb5483e-36e1-4688-b7f5-ea07361b26a8");
        assert_eq!(s.timing.stabilization_delay(), Duration::from_millis(1000));
        assert_eq!(s.timing.settle_delay(), Duration::from_millis(200));
        assert_eq!(s.time_sync.default_timezone, "Europe/Rome");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"timing":{"settle_delay_ms":350}}"#).unwrap();

        let service = SettingsService::open(path);
        assert_eq!(service.get().timing.settle_delay_ms, 350);
        assert_eq!(service.get().timing.stabilization_delay_ms, 1000);
        assert_eq!(service.get().ble.name_prefix, "MOCHI-");
    }

    #[test]
    fn save_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut service = SettingsService::open(path.clone());
        service.get_mut().time_sync.default_timezone = "Asia/Tokyo".to_string();
        service.save().unwrap();

        let reloaded = SettingsService::open(path);
        assert_eq!(reloaded.get().time_sync.default_timezone, "Asia/Tokyo");
    }

    #[test]
    fn name_prefix_override_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::open(path.clone());
        service.set_name_prefix("MOCHI-").unwrap();
        assert!(!path.exists());

        service.set_name_prefix("PET-").unwrap();
        let reloaded = SettingsService::open(path);
        assert_eq!(reloaded.get().ble.name_prefix, "PET-");
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::open(path);
        assert_eq!(service.get().ble.scan_window_ms, 4000);
    }
}
