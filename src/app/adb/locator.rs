use std::path::{Path, PathBuf};

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

pub fn bundled_adb_path(bundle_dir: &Path) -> PathBuf {
    let name = if cfg!(windows) { "adb.exe" } else { "adb" };
    bundle_dir.join("Tools").join(name)
}

/// Picks the configured executable, then the one bundled under `Tools/`.
/// `None` means no bridge is available.
pub fn resolve_adb_program(config_command_path: &str, bundle_dir: &Path) -> Option<PathBuf> {
    let configured = normalize_command_path(config_command_path);
    if !configured.is_empty() {
        match validate_adb_program(&configured) {
            Ok(()) => return Some(PathBuf::from(configured)),
            Err(message) => {
                tracing::warn!(path = %configured, error = %message, "configured adb path rejected");
            }
        }
    }
    let bundled = bundled_adb_path(bundle_dir);
    if bundled.is_file() {
        return Some(bundled);
    }
    None
}

pub fn validate_adb_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err("ADB executable not found at the configured path".to_string());
    }
    Ok(())
}
