use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::app::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Online,
    Offline,
    Unauthorized,
}

impl ConnectionState {
    /// Maps the state column of `adb devices`. States in which the device
    /// cannot answer shell queries (bootloader, recovery, sideload, ...) count
    /// as offline.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_lowercase().as_str() {
            "device" => ConnectionState::Online,
            "unauthorized" | "authorizing" | "no" => ConnectionState::Unauthorized,
            _ => ConnectionState::Offline,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub label: String,
    pub state: ConnectionState,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandResult {
    pub device_id: Option<String>,
    pub stdout: String,
    pub success: bool,
    pub error: Option<AppError>,
}

impl CommandResult {
    pub fn ok(device_id: Option<&str>, stdout: impl Into<String>) -> Self {
        Self {
            device_id: device_id.map(str::to_string),
            stdout: stdout.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(device_id: Option<&str>, error: AppError) -> Self {
        Self {
            device_id: device_id.map(str::to_string),
            stdout: String::new(),
            success: false,
            error: Some(error),
        }
    }

    /// Output of a successful run, `None` otherwise.
    pub fn payload(&self) -> Option<&str> {
        if self.success {
            Some(self.stdout.as_str())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Packages,
    UninstalledPackages,
    ForegroundApp,
    ResumedActivities,
    CurrentUser,
    UserProfiles,
    Logcat,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 7] = [
        ArtifactKind::CurrentUser,
        ArtifactKind::Packages,
        ArtifactKind::UninstalledPackages,
        ArtifactKind::ForegroundApp,
        ArtifactKind::ResumedActivities,
        ArtifactKind::UserProfiles,
        ArtifactKind::Logcat,
    ];

    pub const TABULAR: [ArtifactKind; 6] = [
        ArtifactKind::CurrentUser,
        ArtifactKind::Packages,
        ArtifactKind::UninstalledPackages,
        ArtifactKind::ForegroundApp,
        ArtifactKind::ResumedActivities,
        ArtifactKind::UserProfiles,
    ];

    pub fn file_prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Packages => "installed_apps",
            ArtifactKind::UninstalledPackages => "uninstalled_apps",
            ArtifactKind::ForegroundApp => "foreground_app",
            ArtifactKind::ResumedActivities => "resumed_activities",
            ArtifactKind::CurrentUser => "current_user",
            ArtifactKind::UserProfiles => "user_profiles",
            ArtifactKind::Logcat => "logcat",
        }
    }

    pub fn header(&self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Packages => &["Package Name"],
            ArtifactKind::UninstalledPackages => &["Uninstalled Package Name"],
            ArtifactKind::ForegroundApp => &["Foreground App Info"],
            ArtifactKind::ResumedActivities => &["Resumed Activity Info"],
            ArtifactKind::CurrentUser => &["Current User ID"],
            ArtifactKind::UserProfiles => &["User Info"],
            ArtifactKind::Logcat => &[],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::Packages => "Installed Apps",
            ArtifactKind::UninstalledPackages => "Uninstalled (Retained) Apps",
            ArtifactKind::ForegroundApp => "Current Foreground App",
            ArtifactKind::ResumedActivities => "Resumed Activities",
            ArtifactKind::CurrentUser => "Current User ID",
            ArtifactKind::UserProfiles => "User Profiles",
            ArtifactKind::Logcat => "Logcat",
        }
    }

    pub fn extension(&self) -> &'static str {
        if self.is_tabular() {
            "csv"
        } else {
            "txt"
        }
    }

    pub fn is_tabular(&self) -> bool {
        !matches!(self, ArtifactKind::Logcat)
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.file_prefix() == prefix)
    }

    /// Accepts the file prefix or a short alias (`packages`, `users`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_lowercase().replace('-', "_");
        if let Some(kind) = Self::from_prefix(&normalized) {
            return Some(kind);
        }
        match normalized.as_str() {
            "packages" | "installed" => Some(ArtifactKind::Packages),
            "uninstalled" | "uninstalled_packages" => Some(ArtifactKind::UninstalledPackages),
            "foreground" => Some(ArtifactKind::ForegroundApp),
            "resumed" | "activities" => Some(ArtifactKind::ResumedActivities),
            "user" => Some(ArtifactKind::CurrentUser),
            "users" | "profiles" => Some(ArtifactKind::UserProfiles),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_prefix())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub fields: Vec<String>,
}

impl ArtifactRecord {
    pub fn single(value: impl Into<String>) -> Self {
        Self {
            fields: vec![value.into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArtifactSet {
    pub kind: ArtifactKind,
    pub device_id: String,
    pub captured_at: NaiveDateTime,
    pub records: Vec<ArtifactRecord>,
    /// Set when the underlying command failed; the set is then empty.
    pub condition: Option<AppError>,
}

impl ArtifactSet {
    pub fn values(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter_map(|record| record.fields.first().map(String::as_str))
            .collect()
    }
}

/// Logcat is kept verbatim instead of being split into records.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogcatCapture {
    pub device_id: String,
    pub captured_at: NaiveDateTime,
    pub text: String,
    pub condition: Option<AppError>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: ArtifactKind,
    pub device_id: String,
    pub captured_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Found,
    NoData,
    Error,
    NotAnalyzed,
}

impl ArtifactStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactStatus::Found => "Found",
            ArtifactStatus::NoData => "No Data",
            ArtifactStatus::Error => "Error",
            ArtifactStatus::NotAnalyzed => "Not Analyzed",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReportRow {
    pub device: String,
    pub artifact: Option<StoredArtifact>,
    pub kind: ArtifactKind,
    pub data_type: String,
    pub status: ArtifactStatus,
}

/// Free text typed by the operator; escaped when rendered.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportHeader {
    pub investigator: String,
    pub organization: String,
    pub logo_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Report {
    pub device_id: String,
    pub device_descriptor: String,
    pub investigator: String,
    pub organization: String,
    pub logo: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<ReportRow>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReportOutput {
    pub report: Report,
    pub output_path: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}
