use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

const DEFAULT_API_URL: &str = "https://api.vaultsync.app";
const DEFAULT_GRACE_MS: u64 = 2000;
const DEFAULT_ECHO_TOLERANCE_MS: u64 = 2000;
const DEFAULT_STABLE_MS: u64 = 1500;
const DEFAULT_FEED_POLL_SECS: u64 = 5;

/// What the daemon would run with, as seen from this environment.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SettingsSnapshot {
    pub api_url: String,
    pub settings_file: String,
    pub saved_folder: Option<String>,
    pub token_source: &'static str,
    pub autostart: bool,
    pub grace_ms: u64,
    pub echo_tolerance_ms: u64,
    pub stable_ms: u64,
    pub feed_poll_secs: u64,
    pub trash_remote_deletes: bool,
}

pub fn read_settings_snapshot() -> SettingsSnapshot {
    let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
    let settings_file = std::env::var("VAULTSYNC_SETTINGS_FILE")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| expand_with_home(&value, &home))
        .unwrap_or_else(default_settings_file);
    let api_url = std::env::var("VAULTSYNC_API_URL")
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let token_source = if std::env::var("VAULTSYNC_TOKEN").is_ok_and(|v| !v.trim().is_empty()) {
        "environment"
    } else {
        "keyring"
    };

    SettingsSnapshot {
        api_url,
        saved_folder: read_saved_folder(&settings_file),
        settings_file: settings_file.display().to_string(),
        token_source,
        autostart: read_bool_env("VAULTSYNC_AUTOSTART", false),
        grace_ms: read_u64_env("VAULTSYNC_GRACE_MS", DEFAULT_GRACE_MS),
        echo_tolerance_ms: read_u64_env("VAULTSYNC_ECHO_TOLERANCE_MS", DEFAULT_ECHO_TOLERANCE_MS),
        stable_ms: read_u64_env("VAULTSYNC_STABLE_MS", DEFAULT_STABLE_MS),
        feed_poll_secs: read_u64_env("VAULTSYNC_FEED_POLL_SECS", DEFAULT_FEED_POLL_SECS),
        trash_remote_deletes: read_bool_env("VAULTSYNC_TRASH_REMOTE_DELETES", false),
    }
}

fn read_saved_folder(settings_file: &Path) -> Option<String> {
    let bytes = std::fs::read(settings_file).ok()?;
    let values: Value = serde_json::from_slice(&bytes).ok()?;
    values
        .get("folderPath")
        .and_then(Value::as_str)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
}

fn default_settings_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("vaultsync")
        .join("settings.json")
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
