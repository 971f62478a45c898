//! Per-device error types

use std::path::PathBuf;

use thiserror::Error;

/// A failure on one physical keyboard or its virtual output device.
///
/// Fatal to that device's relay loop only.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to open input device {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to grab device '{name}' for exclusive access. Is another application using it?")]
    Grab {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create virtual device '{name}'")]
    VirtualDevice {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No write access to {path}. Run as root or add a udev rule for the uinput group")]
    UinputAccess {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to read events from '{name}'")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write events to virtual device '{name}'")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
