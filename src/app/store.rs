use chrono::{NaiveDateTime, Timelike};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::app::adb::paths::sanitize_filename_component;
use crate::app::error::AppError;
use crate::app::index::ArtifactIndex;
use crate::app::models::{ArtifactKind, ArtifactSet, LogcatCapture, StoredArtifact};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Owns the output directory's file namespace. Files are named
/// `<kind>_<device>_<YYYYMMDD_HHMMSS>.<ext>`; two captures of the same kind
/// and device within one second map to the same name and the later one
/// replaces the earlier file as a whole.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    output_dir: PathBuf,
    index: ArtifactIndex,
}

impl ArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        let index = ArtifactIndex::for_dir(&output_dir);
        Self { output_dir, index }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn ensure_dir(&self, trace_id: &str) -> Result<(), AppError> {
        fs::create_dir_all(&self.output_dir).map_err(|err| {
            AppError::storage_write(
                format!("Failed to create output dir {}: {err}", self.output_dir.display()),
                trace_id,
            )
        })
    }

    pub fn save(&self, set: &ArtifactSet, trace_id: &str) -> Result<StoredArtifact, AppError> {
        if !set.kind.is_tabular() {
            return Err(AppError::validation(
                format!("{} is not a tabular artifact", set.kind),
                trace_id,
            ));
        }
        let stored = self.prepare(set.kind, &set.device_id, set.captured_at, trace_id)?;

        let mut tmp = self.temp_file(trace_id)?;
        {
            let mut writer = csv::Writer::from_writer(&mut tmp);
            writer
                .write_record(set.kind.header())
                .and_then(|_| {
                    set.records
                        .iter()
                        .try_for_each(|record| writer.write_record(&record.fields))
                })
                .map_err(|err| write_error(&stored.path, err, trace_id))?;
            writer
                .flush()
                .map_err(|err| write_error(&stored.path, err, trace_id))?;
        }
        self.commit(tmp, stored, trace_id)
    }

    pub fn save_logcat(&self, capture: &LogcatCapture, trace_id: &str) -> Result<StoredArtifact, AppError> {
        let stored = self.prepare(ArtifactKind::Logcat, &capture.device_id, capture.captured_at, trace_id)?;
        let mut tmp = self.temp_file(trace_id)?;
        tmp.write_all(capture.text.as_bytes())
            .and_then(|_| tmp.flush())
            .map_err(|err| write_error(&stored.path, err, trace_id))?;
        self.commit(tmp, stored, trace_id)
    }

    /// Tabular artifacts for the device, ordered by file name (kind, then time).
    /// Files the index attributes to another device are never listed here,
    /// even when their sanitized serial matches.
    pub fn list_for_device(&self, device_id: &str, trace_id: &str) -> Vec<StoredArtifact> {
        let indexed = self
            .index
            .for_device(device_id)
            .and_then(|artifacts| Ok((artifacts, self.index.owners()?)));
        let (mut artifacts, owners) = match indexed {
            Ok(indexed) => indexed,
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err, "artifact index unavailable; scanning directory");
                (Vec::new(), HashMap::new())
            }
        };

        artifacts.retain(|artifact| {
            let present = artifact.path.is_file();
            if !present {
                if let Err(err) = self.index.forget(&artifact.file_name) {
                    warn!(trace_id = %trace_id, error = %err, "failed to drop stale index row");
                }
            }
            present
        });

        for artifact in self.scan_for_device(device_id) {
            if let Some(owner) = owners.get(&artifact.file_name) {
                if owner != device_id {
                    warn!(
                        trace_id = %trace_id,
                        serial = %device_id,
                        owner = %owner,
                        file = %artifact.file_name,
                        "skipping artifact indexed for another device"
                    );
                }
                continue;
            }
            if let Err(err) = self.index.record_if_absent(&artifact) {
                warn!(trace_id = %trace_id, error = %err, "failed to backfill artifact index");
            }
            artifacts.push(artifact);
        }

        artifacts.retain(|artifact| artifact.kind.is_tabular());
        artifacts.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        artifacts
    }

    /// Directory scan for `*_<device>_*` files; used for files the index has
    /// not seen.
    pub fn scan_for_device(&self, device_id: &str) -> Vec<StoredArtifact> {
        let wanted = sanitize_filename_component(device_id);
        let Ok(entries) = fs::read_dir(&self.output_dir) else {
            return Vec::new();
        };
        let mut artifacts: Vec<StoredArtifact> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                let file_name = entry.file_name().to_string_lossy().to_string();
                let (kind, file_device, captured_at) = parse_artifact_file_name(&file_name)?;
                if file_device != wanted {
                    return None;
                }
                Some(StoredArtifact {
                    path: entry.path(),
                    file_name,
                    kind,
                    device_id: device_id.to_string(),
                    captured_at,
                })
            })
            .collect();
        artifacts.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        artifacts
    }

    fn prepare(
        &self,
        kind: ArtifactKind,
        device_id: &str,
        captured_at: NaiveDateTime,
        trace_id: &str,
    ) -> Result<StoredArtifact, AppError> {
        if device_id.trim().is_empty() {
            return Err(AppError::validation("device id is required", trace_id));
        }
        self.ensure_dir(trace_id)?;
        let captured_at = captured_at.with_nanosecond(0).unwrap_or(captured_at);
        let file_name = artifact_file_name(kind, device_id, captured_at);
        Ok(StoredArtifact {
            path: self.output_dir.join(&file_name),
            file_name,
            kind,
            device_id: device_id.to_string(),
            captured_at,
        })
    }

    fn temp_file(&self, trace_id: &str) -> Result<NamedTempFile, AppError> {
        NamedTempFile::new_in(&self.output_dir).map_err(|err| {
            AppError::storage_write(format!("Failed to create temp file: {err}"), trace_id)
        })
    }

    fn commit(&self, tmp: NamedTempFile, stored: StoredArtifact, trace_id: &str) -> Result<StoredArtifact, AppError> {
        tmp.persist(&stored.path)
            .map_err(|err| write_error(&stored.path, err.error, trace_id))?;
        if let Err(err) = self.index.record(&stored) {
            warn!(trace_id = %trace_id, error = %err, "failed to index artifact");
        }
        info!(
            trace_id = %trace_id,
            serial = %stored.device_id,
            kind = %stored.kind,
            path = %stored.path.display(),
            "artifact saved"
        );
        Ok(stored)
    }
}

fn write_error(path: &Path, err: impl std::fmt::Display, trace_id: &str) -> AppError {
    AppError::storage_write(format!("Failed to write {}: {err}", path.display()), trace_id)
}

pub fn artifact_file_name(kind: ArtifactKind, device_id: &str, captured_at: NaiveDateTime) -> String {
    format!(
        "{}_{}_{}.{}",
        kind.file_prefix(),
        sanitize_filename_component(device_id),
        captured_at.format(TIMESTAMP_FORMAT),
        kind.extension()
    )
}

/// `sequence` 0 is the plain name; later values disambiguate reports
/// generated within the same second.
pub fn report_file_name(device_id: &str, generated_at: NaiveDateTime, sequence: u32) -> String {
    let suffix = if sequence == 0 {
        String::new()
    } else {
        format!("_{sequence}")
    };
    format!(
        "forensic_report_{}_{}{suffix}.html",
        sanitize_filename_component(device_id),
        generated_at.format(TIMESTAMP_FORMAT)
    )
}

fn artifact_name_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| {
            let prefixes = ArtifactKind::ALL
                .iter()
                .map(|kind| kind.file_prefix())
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"^({prefixes})_(.+)_(\d{{8}}_\d{{6}})\.(csv|txt)$")).ok()
        })
        .as_ref()
}

/// Inverse of [`artifact_file_name`]: `(kind, sanitized device, timestamp)`.
pub fn parse_artifact_file_name(file_name: &str) -> Option<(ArtifactKind, String, NaiveDateTime)> {
    let caps = artifact_name_regex()?.captures(file_name)?;
    let kind = ArtifactKind::from_prefix(&caps[1])?;
    if kind.extension() != &caps[4] {
        return None;
    }
    let captured_at = NaiveDateTime::parse_from_str(&caps[3], TIMESTAMP_FORMAT).ok()?;
    Some((kind, caps[2].to_string(), captured_at))
}
