use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::adb::locator::normalize_command_path;
use crate::app::error::AppError;

const DEFAULT_REPORTS_DIR: &str = "reports";
const LOG_LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AdbSettings {
    #[serde(default)]
    pub command_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ReportSettings {
    #[serde(default)]
    pub investigator: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub logo_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub report: ReportSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub output_path: String,
    #[serde(default)]
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            adb: AdbSettings::default(),
            report: ReportSettings::default(),
            logging: LoggingSettings::default(),
            output_path: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AppConfig {
    /// Falls back to the `reports` directory bundled next to the executable.
    pub fn resolved_output_dir(&self) -> PathBuf {
        let trimmed = self.output_path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
        bundle_dir().join(DEFAULT_REPORTS_DIR)
    }
}

/// Directory holding the running executable; bundled tools and reports live beside it.
pub fn bundle_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("AUTOTRIAGE_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".autotriage_config.json")
}

pub fn backup_config_path(path: &Path) -> PathBuf {
    path.with_extension("backup.json")
}

pub fn load_config(trace_id: &str) -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path(), trace_id)
}

pub fn save_config(config: &AppConfig, trace_id: &str) -> Result<(), AppError> {
    let path = config_path();
    save_config_to_path(config, &path, &backup_config_path(&path), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), trace_id))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
    trace_id: &str,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(&validate_config(config.clone()))
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), trace_id))?;
    fs::write(path, payload)
        .map_err(|err| AppError::storage_write(format!("Failed to write config: {err}"), trace_id))?;
    Ok(())
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    config.adb.command_path = normalize_command_path(&config.adb.command_path);
    config.output_path = config.output_path.trim().to_string();
    let level = config.logging.log_level.trim().to_uppercase();
    config.logging.log_level = if LOG_LEVELS.contains(&level.as_str()) {
        level
    } else {
        "INFO".to_string()
    };
    if config.version.trim().is_empty() {
        config.version = env!("CARGO_PKG_VERSION").to_string();
    }
    config
}
