use std::collections::BTreeSet;

use crate::app::models::{ConnectionState, Device};

pub const FOREGROUND_MARKER: &str = "mCurrentFocus";
pub const RESUMED_MARKER: &str = "ResumedActivity";

/// Parses `adb devices -l`. Header and daemon chatter are skipped; every
/// device line is kept, whatever its state.
pub fn parse_adb_devices(output: &str) -> Vec<Device> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            let id = tokens[0].to_string();
            let info = tokens[1..].join(" ");
            Some(Device {
                label: format!("{id} - {info}"),
                state: ConnectionState::from_token(tokens[1]),
                id,
            })
        })
        .collect()
}

/// Finds the `devices -l` line describing `device_id`.
pub fn find_device_line(output: &str, device_id: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| line.split_whitespace().next() == Some(device_id))
        .map(str::to_string)
}

/// `package:com.example` -> `com.example`. Lines without a colon are dropped.
pub fn parse_package_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(_, name)| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Packages known to the package manager (`pm list packages -u`) that are no
/// longer installed, sorted and de-duplicated.
pub fn uninstalled_only(all_packages: &[String], installed: &[String]) -> Vec<String> {
    let installed: BTreeSet<&str> = installed.iter().map(String::as_str).collect();
    all_packages
        .iter()
        .map(String::as_str)
        .filter(|name| !installed.contains(name))
        .collect::<BTreeSet<&str>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

pub fn lines_containing(output: &str, marker: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains(marker))
        .map(|line| line.trim().to_string())
        .collect()
}

/// Every line verbatim, blank ones included.
pub fn raw_lines(output: &str) -> Vec<String> {
    output.lines().map(str::to_string).collect()
}
