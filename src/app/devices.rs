use tracing::{info, warn};

use crate::app::adb::parse::{find_device_line, parse_adb_devices};
use crate::app::adb::runner::CommandRunner;
use crate::app::error::AppError;
use crate::app::models::{ConnectionState, Device};

pub const DESCRIPTOR_UNAVAILABLE: &str = "Not available";

fn devices_args() -> Vec<String> {
    vec!["devices".to_string(), "-l".to_string()]
}

/// Reachable devices from the latest enumeration plus the operator's pick.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    selected: Option<usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty list is a valid answer ("nothing connected"); `Err` means the
    /// bridge itself could not be queried.
    pub fn list_devices(
        &mut self,
        runner: &dyn CommandRunner,
        trace_id: &str,
    ) -> Result<Vec<Device>, AppError> {
        let result = runner.execute(None, &devices_args(), trace_id);
        if !result.success {
            return Err(result
                .error
                .unwrap_or_else(|| AppError::command_failed("adb devices failed", trace_id)));
        }

        let devices: Vec<Device> = parse_adb_devices(&result.stdout)
            .into_iter()
            .filter(|device| device.state != ConnectionState::Offline)
            .collect();
        info!(trace_id = %trace_id, count = devices.len(), "devices enumerated");

        let previous = self.selected().map(|device| device.id.clone());
        self.devices = devices;
        self.selected = previous.and_then(|id| self.devices.iter().position(|device| device.id == id));
        Ok(self.devices.clone())
    }

    /// Out-of-range indices leave the current selection untouched.
    pub fn select_device(&mut self, index: usize) -> Option<&Device> {
        if index < self.devices.len() {
            self.selected = Some(index);
        } else {
            warn!(index, available = self.devices.len(), "device index out of range");
        }
        self.selected()
    }

    pub fn select_by_id(&mut self, device_id: &str) -> Option<&Device> {
        if let Some(index) = self.devices.iter().position(|device| device.id == device_id) {
            self.selected = Some(index);
        }
        self.selected()
    }

    pub fn selected(&self) -> Option<&Device> {
        self.selected.and_then(|index| self.devices.get(index))
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }
}

/// Lifts an empty enumeration into the user-facing "no devices" notice.
pub fn require_devices(devices: &[Device], trace_id: &str) -> Result<(), AppError> {
    if devices.is_empty() {
        return Err(AppError::no_devices(
            "No connected device found. Connect a device and enable USB debugging.",
            trace_id,
        ));
    }
    Ok(())
}

/// The `devices -l` line for the device, used to identify it in reports.
pub fn device_descriptor(runner: &dyn CommandRunner, device_id: &str, trace_id: &str) -> String {
    runner
        .execute(None, &devices_args(), trace_id)
        .payload()
        .and_then(|stdout| find_device_line(stdout, device_id))
        .unwrap_or_else(|| DESCRIPTOR_UNAVAILABLE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::runner::scripted::ScriptedRunner;
    use crate::app::error::ErrorKind;

    const LISTING: &str = "List of devices attached\nABC123 device product:foo model:Pixel\nDEAD01 offline\nR58M unauthorized usb:1-1\n";

    #[test]
    fn single_device_scenario() {
        let runner = ScriptedRunner::new().with("devices -l", "List of devices attached\nABC123 device product:foo");
        let mut registry = DeviceRegistry::new();
        let devices = registry.list_devices(&runner, "t").expect("list");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "ABC123");
    }

    #[test]
    fn excludes_offline_devices() {
        let runner = ScriptedRunner::new().with("devices -l", LISTING);
        let mut registry = DeviceRegistry::new();
        let devices = registry.list_devices(&runner, "t").expect("list");
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|device| device.state != ConnectionState::Offline));
    }

    #[test]
    fn empty_listing_is_not_an_error() {
        let runner = ScriptedRunner::new().with("devices -l", "List of devices attached");
        let mut registry = DeviceRegistry::new();
        let devices = registry.list_devices(&runner, "t").expect("list");
        assert!(devices.is_empty());
        let err = require_devices(&devices, "t").expect_err("no devices");
        assert!(err.is(ErrorKind::NoDevicesFound));
    }

    #[test]
    fn missing_tool_is_distinct_from_no_devices() {
        let runner = ScriptedRunner::missing_tool();
        let mut registry = DeviceRegistry::new();
        let err = registry.list_devices(&runner, "t").expect_err("tool missing");
        assert!(err.is(ErrorKind::ToolNotFound));
    }

    #[test]
    fn out_of_range_selection_is_a_no_op() {
        let runner = ScriptedRunner::new().with("devices -l", LISTING);
        let mut registry = DeviceRegistry::new();
        registry.list_devices(&runner, "t").expect("list");
        assert_eq!(registry.select_device(1).map(|d| d.id.as_str()), Some("R58M"));
        assert_eq!(registry.select_device(5).map(|d| d.id.as_str()), Some("R58M"));
        assert_eq!(registry.select_by_id("ABC123").map(|d| d.id.as_str()), Some("ABC123"));
    }

    #[test]
    fn selection_survives_refresh_by_id() {
        let runner = ScriptedRunner::new().with("devices -l", LISTING);
        let mut registry = DeviceRegistry::new();
        registry.list_devices(&runner, "t").expect("list");
        registry.select_device(1);
        registry.list_devices(&runner, "t").expect("relist");
        assert_eq!(registry.selected().map(|d| d.id.as_str()), Some("R58M"));
    }

    #[test]
    fn descriptor_falls_back_when_unavailable() {
        let runner = ScriptedRunner::new().with("devices -l", LISTING);
        assert_eq!(
            device_descriptor(&runner, "ABC123", "t"),
            "ABC123 device product:foo model:Pixel"
        );
        assert_eq!(device_descriptor(&runner, "NOPE", "t"), DESCRIPTOR_UNAVAILABLE);
        assert_eq!(
            device_descriptor(&ScriptedRunner::missing_tool(), "ABC123", "t"),
            DESCRIPTOR_UNAVAILABLE
        );
    }
}
