//! Device lifecycle management
//!
//! The `DeviceManager` owns one relay task per grabbed keyboard. It is
//! driven from the main loop: initial enumeration, hot-plug events, relay
//! exits and shutdown all go through it.
//!
//! ```text
//!   enumerate / hotplug Add ──► try_start_device ──► grab + virtual device
//!                                                        │
//!                                                        ▼
//!   hotplug Remove ──► stop_device ──► watch ──►  relay task (per device)
//!                                                        │ exit
//!   reap_next ◄──────────────────────── JoinSet ◄────────┘
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chordmap_config::Config;
use evdev::Device;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::device::{enumerate_keyboards, is_keyboard, DeviceInfo};
use crate::error::DeviceError;
use crate::hotplug::HotplugEvent;
use crate::injector::{output_keys, PassthroughCapabilities, VirtualKeyboard};
use crate::mapping::MappingTable;
use crate::matcher::Matcher;
use crate::relay::run_relay;
use crate::window::WindowContext;

/// Attempts to open a freshly added device node
const HOTPLUG_OPEN_ATTEMPTS: u32 = 3;

/// Delay between those attempts while udev sets permissions
const HOTPLUG_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// What a relay task reports when it ends.
struct RelayExit {
    path: PathBuf,
    name: String,
    id: u64,
    result: Result<(), DeviceError>,
}

struct RunningDevice {
    id: u64,
    name: String,
    shutdown: watch::Sender<bool>,
}

/// Manages grabbed keyboards and their relay tasks.
pub struct DeviceManager {
    config: Arc<Config>,
    context: Arc<dyn WindowContext>,
    devices: HashMap<PathBuf, RunningDevice>,
    tasks: JoinSet<RelayExit>,
    next_id: u64,
}

impl DeviceManager {
    pub fn new(config: Arc<Config>, context: Arc<dyn WindowContext>) -> Self {
        Self {
            config,
            context,
            devices: HashMap::new(),
            tasks: JoinSet::new(),
            next_id: 0,
        }
    }

    /// Number of keyboards currently relayed.
    pub fn running_count(&self) -> usize {
        self.devices.len()
    }

    /// Start every configured keyboard present at startup.
    pub fn start_all(&mut self) -> Result<usize> {
        for info in enumerate_keyboards()? {
            if let Err(e) = self.try_start_device(&info.path) {
                tracing::error!("Failed to start device '{}': {:#}", info.name, anyhow::Error::new(e));
            }
        }
        Ok(self.running_count())
    }

    /// Try to start relaying the keyboard at `path`.
    ///
    /// * `Ok(true)` - device grabbed and its relay task spawned
    /// * `Ok(false)` - not a keyboard, one of ours, not selected, or already running
    /// * `Err(_)` - device could not be opened, grabbed or mirrored
    pub fn try_start_device(&mut self, path: &Path) -> Result<bool, DeviceError> {
        if self.devices.contains_key(path) {
            tracing::debug!("Device at {} already running", path.display());
            return Ok(false);
        }

        let mut device = Device::open(path).map_err(|source| DeviceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let info = DeviceInfo::from_device(path, &device);

        if info.is_virtual() || !is_keyboard(&device) {
            tracing::debug!("Skipping '{}' at {}", info.name, path.display());
            return Ok(false);
        }

        let path_str = info.path_str();
        if !self.config.selects(&info.name, info.phys.as_deref(), &path_str) {
            tracing::debug!(
                "Device '{}' at {} is not selected by the configuration",
                info.name,
                path.display()
            );
            return Ok(false);
        }

        let mappings = self
            .config
            .mappings_for(&info.name, info.phys.as_deref(), &path_str);
        let table = Arc::new(MappingTable::new(mappings));
        let keys = output_keys(device.supported_keys(), &table);
        let extra = PassthroughCapabilities::of(&device);
        let mut sink = VirtualKeyboard::new(&info.name, &keys, &extra)?;

        device.grab().map_err(|source| DeviceError::Grab {
            name: info.name.clone(),
            source,
        })?;

        let mut stream = device.into_event_stream().map_err(|source| DeviceError::Read {
            name: info.name.clone(),
            source,
        })?;

        let mut matcher = Matcher::new(table.clone(), self.context.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let id = self.next_id;
        self.next_id += 1;

        tracing::info!(
            "Grabbed '{}' at {} ({} mapping(s), output '{}')",
            info.name,
            path.display(),
            table.len(),
            sink.name()
        );

        let task_path = path.to_path_buf();
        let name = info.name.clone();
        self.tasks.spawn(async move {
            let result = run_relay(&name, &mut stream, &mut sink, &mut matcher, shutdown_rx).await;
            if let Err(e) = stream.device_mut().ungrab() {
                tracing::debug!("Ungrab of '{}' failed: {}", name, e);
            }
            RelayExit {
                path: task_path,
                name,
                id,
                result,
            }
        });

        self.devices.insert(
            path.to_path_buf(),
            RunningDevice {
                id,
                name: info.name,
                shutdown: shutdown_tx,
            },
        );

        Ok(true)
    }

    /// Signal the relay of the device at `path` to stop.
    pub fn stop_device(&mut self, path: &Path) {
        match self.devices.remove(path) {
            Some(running) => {
                tracing::info!("Releasing device '{}' at {}", running.name, path.display());
                let _ = running.shutdown.send(true);
            }
            None => {
                tracing::debug!("Device at {} was not grabbed, nothing to release", path.display());
            }
        }
    }

    /// Grab or release a device in response to a hot-plug event.
    pub async fn handle_hotplug(&mut self, event: HotplugEvent) {
        match event {
            HotplugEvent::Add { devnode } => {
                tracing::info!("Device connected at {}", devnode.display());

                for attempt in 1..=HOTPLUG_OPEN_ATTEMPTS {
                    match self.try_start_device(&devnode) {
                        Ok(true) => break,
                        Ok(false) => {
                            tracing::debug!("Device at {} ignored", devnode.display());
                            break;
                        }
                        Err(e @ DeviceError::Open { .. }) if attempt < HOTPLUG_OPEN_ATTEMPTS => {
                            tracing::debug!("{} (attempt {}), retrying", e, attempt);
                            tokio::time::sleep(HOTPLUG_SETTLE_DELAY).await;
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Failed to grab device at {}: {:#}",
                                devnode.display(),
                                anyhow::Error::new(e)
                            );
                            break;
                        }
                    }
                }
            }
            HotplugEvent::Remove { devnode } => {
                tracing::info!("Device disconnected at {}", devnode.display());
                self.stop_device(&devnode);
            }
        }
    }

    /// Wait for the next relay task to finish and forget its device, so a
    /// re-plug can grab it again. Returns the device path.
    ///
    /// Returns `None` when no relay is running.
    pub async fn reap_next(&mut self) -> Option<PathBuf> {
        loop {
            match self.tasks.join_next().await? {
                Ok(RelayExit {
                    path,
                    name,
                    id,
                    result,
                }) => {
                    if self.devices.get(&path).is_some_and(|d| d.id == id) {
                        self.devices.remove(&path);
                    }
                    match result {
                        Ok(()) => tracing::info!("Relay for '{}' stopped", name),
                        Err(e) => tracing::error!(
                            "Relay for '{}' failed: {:#}",
                            name,
                            anyhow::Error::new(e)
                        ),
                    }
                    return Some(path);
                }
                Err(e) => tracing::error!("Relay task aborted: {}", e),
            }
        }
    }

    /// Stop every relay and wait until all of them released their keys.
    pub async fn shutdown_all(&mut self) {
        for running in self.devices.values() {
            let _ = running.shutdown.send(true);
        }
        self.devices.clear();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(exit) => tracing::debug!("Relay for '{}' finished", exit.name),
                Err(e) => tracing::error!("Relay task aborted: {}", e),
            }
        }
    }

    /// Whether relay tasks are outstanding.
    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }
}
