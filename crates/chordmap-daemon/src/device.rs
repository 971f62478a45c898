//! Device enumeration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use evdev::Device;

use crate::injector::VIRTUAL_DEVICE_PREFIX;

/// Identifiers of an input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub phys: Option<String>,
}

impl DeviceInfo {
    pub fn from_device(path: &Path, device: &Device) -> Self {
        Self {
            path: path.to_path_buf(),
            name: device.name().unwrap_or("Unknown").to_string(),
            phys: device.physical_path().map(str::to_string),
        }
    }

    /// Path as used for matching `keyboards` identifiers.
    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Whether this is one of our own virtual devices.
    pub fn is_virtual(&self) -> bool {
        self.name.starts_with(VIRTUAL_DEVICE_PREFIX)
    }
}

/// Whether a path names an evdev event node (`/dev/input/eventN`).
pub fn is_event_node(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("event"))
        .unwrap_or(false)
}

/// Enumerate keyboard devices, sorted by path.
pub fn enumerate_keyboards() -> Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();

    for entry in std::fs::read_dir("/dev/input").context("Failed to read /dev/input")? {
        let path = entry?.path();
        if !is_event_node(&path) {
            continue;
        }

        match Device::open(&path) {
            Ok(device) if is_keyboard(&device) => {
                devices.push(DeviceInfo::from_device(&path, &device));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    devices.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(devices)
}

/// Check if a device is a keyboard
pub fn is_keyboard(device: &Device) -> bool {
    device.supported_events().contains(evdev::EventType::KEY)
        && device
            .supported_keys()
            .map(|keys| keys.contains(evdev::Key::KEY_A))
            .unwrap_or(false)
}
